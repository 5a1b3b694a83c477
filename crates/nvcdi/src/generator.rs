//! Device spec generators and the per-call arena that owns their GPU records.

use error_stack::Report;
use error_stack::ResultExt;

use crate::cdi;
use crate::discover::merge;
use crate::discover::DiscoverRef;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::factory::full_gpu_discoverer;
use crate::factory::mig_discoverer;
use crate::factory::Context;
use crate::inventory::GpuHandle;
use crate::inventory::GpuRecord;
use crate::inventory::Inventory;
use crate::lookup::join_root;
use crate::namer::NameTarget;
use crate::nvcaps::MigMinors;

pub(crate) const IMEX_CHANNEL_PREFIX: &str = "/dev/nvidia-caps-imex-channels/channel";

/// Produces the CDI devices for one requested device.
#[derive(Debug)]
pub(crate) enum DeviceSpecGenerator {
    /// A full GPU, with extra per-device discoverers in mixed CSV mode.
    FullGpu { gpu: GpuHandle, extra: Vec<DiscoverRef> },
    /// A MIG device of the `parent` GPU.
    Mig { parent: GpuHandle, mig: u32 },
    ImexChannel { id: String },
    /// An iGPU whose device nodes come from the CSV mount specs.
    Csv { index: u32, uuid: String, devices: DiscoverRef },
    /// A single device named `all`.
    All { devices: DiscoverRef },
}

/// Generators for one call, together with the GPU records they refer to.
#[derive(Debug, Default)]
pub(crate) struct GeneratorArena {
    inventory: Option<Inventory>,
    generators: Vec<DeviceSpecGenerator>,
}

impl GeneratorArena {
    pub fn new(inventory: Option<Inventory>) -> Self {
        Self {
            inventory,
            generators: Vec::new(),
        }
    }

    pub fn with_generator(generator: DeviceSpecGenerator) -> Self {
        let mut arena = Self::new(None);
        arena.push(generator);
        arena
    }

    pub fn push(&mut self, generator: DeviceSpecGenerator) {
        self.generators.push(generator);
    }

    #[cfg(test)]
    pub fn inventory(&self) -> Option<&Inventory> {
        self.inventory.as_ref()
    }

    pub fn take_inventory(self) -> Option<Inventory> {
        self.inventory
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    pub fn device_specs(&self, ctx: &Context) -> NvcdiResult<Vec<cdi::Device>> {
        let has_mig = self
            .generators
            .iter()
            .any(|g| matches!(g, DeviceSpecGenerator::Mig { .. }));
        let mig_minors = if has_mig {
            MigMinors::load(&ctx.system_root)?
        } else {
            MigMinors::default()
        };

        let mut devices = Vec::new();
        for generator in &self.generators {
            let specs = match generator {
                DeviceSpecGenerator::FullGpu { gpu, extra } => {
                    let gpu = self.gpu_record(*gpu)?;
                    let discoverer = merge(
                        std::iter::once(full_gpu_discoverer(ctx, gpu)).chain(extra.iter().cloned()),
                    );
                    let names = ctx.namers.names(NameTarget::Gpu {
                        index: gpu.index,
                        uuid: &gpu.uuid,
                    })?;
                    named_devices(ctx, names, &discoverer)
                        .attach_printable_lazy(|| format!("GPU {}", gpu.index))?
                }
                DeviceSpecGenerator::Mig { parent, mig } => {
                    let parent = self.gpu_record(*parent)?;
                    let record = parent.mig(*mig).ok_or_else(|| {
                        Report::new(NvcdiError::nvml(format!(
                            "GPU {} has no MIG device {mig}",
                            parent.index
                        )))
                    })?;
                    let discoverer = mig_discoverer(ctx, parent, record, &mig_minors)?;
                    let names = ctx.namers.names(NameTarget::Mig {
                        gpu: parent.index,
                        mig: record.index,
                        uuid: &record.uuid,
                    })?;
                    named_devices(ctx, names, &discoverer)
                        .attach_printable_lazy(|| format!("MIG device {}:{mig}", parent.index))?
                }
                DeviceSpecGenerator::ImexChannel { id } => vec![imex_channel(ctx, id)],
                DeviceSpecGenerator::Csv { index, uuid, devices } => {
                    let names = ctx.namers.names(NameTarget::Gpu { index: *index, uuid })?;
                    named_devices(ctx, names, devices)?
                }
                DeviceSpecGenerator::All { devices } => named_devices(ctx, vec!["all".to_string()], devices)?,
            };
            devices.extend(specs);
        }
        Ok(devices)
    }

    fn gpu_record(&self, handle: GpuHandle) -> NvcdiResult<&GpuRecord> {
        self.inventory
            .as_ref()
            .map(|inventory| inventory.gpu(handle))
            .ok_or_else(|| Report::new(NvcdiError::nvml("NVML devices were not enumerated")))
    }
}

fn named_devices(ctx: &Context, names: Vec<String>, discoverer: &DiscoverRef) -> NvcdiResult<Vec<cdi::Device>> {
    let edits = ctx.edits.from_discoverer(discoverer.as_ref())?;
    Ok(names
        .into_iter()
        .map(|name| cdi::Device {
            name,
            annotations: Default::default(),
            container_edits: edits.clone(),
        })
        .collect())
}

/// IMEX channel nodes are not required to exist when the spec is generated.
fn imex_channel(ctx: &Context, id: &str) -> cdi::Device {
    let path = format!("{IMEX_CHANNEL_PREFIX}{id}");
    let host_path = join_root(&ctx.dev_root, &path).to_string_lossy().into_owned();
    cdi::Device {
        name: id.to_string(),
        annotations: Default::default(),
        container_edits: cdi::ContainerEdits {
            device_nodes: vec![cdi::DeviceNode {
                host_path: (host_path != path).then_some(host_path),
                path,
                ..Default::default()
            }],
            ..Default::default()
        },
    }
}
