use std::str::FromStr;

use error_stack::Report;
use serde::Deserialize;

use crate::error::NvcdiError;
use crate::error::NvcdiResult;

/// Strategy used to name generated CDI devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, derive_more::Display, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceNamer {
    /// `0` for GPUs and `0:1` for MIG devices.
    #[default]
    #[display("index")]
    Index,
    /// `gpu0` for GPUs and `mig0:1` for MIG devices.
    #[display("type-index")]
    TypeIndex,
    #[display("uuid")]
    Uuid,
}

impl FromStr for DeviceNamer {
    type Err = Report<NvcdiError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "index" => Ok(Self::Index),
            "type-index" => Ok(Self::TypeIndex),
            "uuid" => Ok(Self::Uuid),
            _ => Err(Report::new(NvcdiError::InvalidOption {
                message: format!("invalid device name strategy {s:?}"),
            })),
        }
    }
}

/// What a device namer needs to know about a device.
#[derive(Debug, Clone, Copy)]
pub enum NameTarget<'a> {
    Gpu { index: u32, uuid: &'a str },
    Mig { gpu: u32, mig: u32, uuid: &'a str },
}

impl DeviceNamer {
    pub fn name(self, target: NameTarget<'_>) -> NvcdiResult<String> {
        match (self, target) {
            (DeviceNamer::Index, NameTarget::Gpu { index, .. }) => Ok(index.to_string()),
            (DeviceNamer::Index, NameTarget::Mig { gpu, mig, .. }) => Ok(format!("{gpu}:{mig}")),
            (DeviceNamer::TypeIndex, NameTarget::Gpu { index, .. }) => Ok(format!("gpu{index}")),
            (DeviceNamer::TypeIndex, NameTarget::Mig { gpu, mig, .. }) => {
                Ok(format!("mig{gpu}:{mig}"))
            }
            (DeviceNamer::Uuid, NameTarget::Gpu { uuid, .. } | NameTarget::Mig { uuid, .. }) => {
                if uuid.is_empty() {
                    return Err(Report::new(NvcdiError::nvml("failed to get device UUID")));
                }
                Ok(uuid.to_string())
            }
        }
    }
}

/// An ordered list of namers; each contributes one alias per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNamers(Vec<DeviceNamer>);

impl Default for DeviceNamers {
    fn default() -> Self {
        Self(vec![DeviceNamer::Index])
    }
}

impl DeviceNamers {
    pub fn new(namers: Vec<DeviceNamer>) -> Self {
        if namers.is_empty() {
            return Self::default();
        }
        Self(namers)
    }

    pub fn names(&self, target: NameTarget<'_>) -> NvcdiResult<Vec<String>> {
        self.0.iter().map(|namer| namer.name(target)).collect()
    }
}
