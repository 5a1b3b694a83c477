use error_stack::Report;
use error_stack::ResultExt;

use super::Simplifier;
use super::Transform;
use crate::cdi;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;

/// Adds a device whose edits are the union of all other devices.
#[derive(Debug, Clone)]
pub struct MergedDevice {
    name: String,
    skip_if_exists: bool,
}

impl MergedDevice {
    pub fn new(name: impl Into<String>, skip_if_exists: bool) -> NvcdiResult<Self> {
        let name = name.into();
        let name = if name.is_empty() { "all".to_string() } else { name };
        cdi::validate_device_name(&name)
            .attach_printable_lazy(|| format!("invalid merged device name {name:?}"))?;
        Ok(Self { name, skip_if_exists })
    }
}

impl Transform for MergedDevice {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()> {
        if spec.devices.iter().any(|d| d.name == self.name) {
            if self.skip_if_exists {
                return Ok(());
            }
            return Err(Report::new(NvcdiError::spec(format!(
                "device {:?} already exists",
                self.name
            ))));
        }

        let mut edits = cdi::ContainerEdits::default();
        for device in &spec.devices {
            edits.append(device.container_edits.clone());
        }
        if edits.is_empty() {
            tracing::debug!("No device edits to merge; not adding device {:?}", self.name);
            return Ok(());
        }
        spec.devices.push(cdi::Device {
            name: self.name.clone(),
            annotations: Default::default(),
            container_edits: edits,
        });

        Simplifier
            .transform(spec)
            .attach_printable_lazy(|| format!("failed to simplify spec after merging device {:?}", self.name))
    }
}
