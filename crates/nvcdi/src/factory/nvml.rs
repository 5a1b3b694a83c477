use std::collections::HashSet;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;

use super::driver_discoverer;
use super::Context;
use crate::discover::drm_device_nodes;
use crate::discover::graphics_discoverer;
use crate::discover::merge;
use crate::discover::ByPathHooks;
use crate::discover::CharDevices;
use crate::discover::CudaCompatHook;
use crate::discover::DeviceFolderPermissions;
use crate::discover::DiscoverRef;
use crate::discover::HookName;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::generator::DeviceSpecGenerator;
use crate::generator::GeneratorArena;
use crate::identifier::parse_identifiers;
use crate::identifier::Identifier;
use crate::inventory::GpuHandle;
use crate::inventory::GpuRecord;
use crate::inventory::Inventory;
use crate::inventory::MigRecord;
use crate::inventory::UuidMatch;
use crate::nvcaps::MigCap;
use crate::nvcaps::MigMinors;

/// Device nodes shared by all GPUs.
pub(crate) const CONTROL_DEVICE_NODES: &[&str] = &[
    "/dev/nvidia-modeset",
    "/dev/nvidia-uvm-tools",
    "/dev/nvidia-uvm",
    "/dev/nvidiactl",
];

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NvmlFactory;

impl NvmlFactory {
    pub fn generators(&self, ids: &[String], inventory: Option<Inventory>) -> NvcdiResult<GeneratorArena> {
        let inventory = inventory.ok_or_else(|| Report::new(NvcdiError::nvml("NVML is not available")))?;
        let identifiers = parse_identifiers(ids)?;

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for id in &identifiers {
            let generators = select(&inventory, id).change_context_lazy(|| NvcdiError::InvalidIdentifier {
                id: id.to_string(),
                message: "failed to create device spec generator".to_string(),
            })?;
            for (key, generator) in generators {
                if seen.insert(key) {
                    selected.push(generator);
                }
            }
        }

        let mut arena = GeneratorArena::new(Some(inventory));
        for generator in selected {
            arena.push(generator);
        }
        Ok(arena)
    }

    pub fn common_edits(&self, ctx: &Context, inventory: Option<&Inventory>) -> NvcdiResult<DiscoverRef> {
        let inventory = inventory.ok_or_else(|| Report::new(NvcdiError::nvml("NVML is not available")))?;
        let version = inventory.driver_version.as_str();
        tracing::info!("Using driver version {version}");

        let control: DiscoverRef = Arc::new(CharDevices::new(&ctx.dev_root, CONTROL_DEVICE_NODES.iter().copied()));
        let graphics = match graphics_discoverer(&ctx.driver, version, ctx.hook_creator.clone()) {
            Ok(graphics) => graphics,
            Err(e) => {
                tracing::warn!("Failed to create discoverer for graphics mounts: {e:?}");
                crate::discover::empty()
            }
        };
        let driver = driver_discoverer(ctx, version)?;
        let compat = CudaCompatHook::new(ctx.hook_creator.clone(), inventory.cuda_driver_version, None);
        let device_nodes = ctx.hook_creator.create(HookName::DisableDeviceNodeModification, &[]);

        Ok(merge([
            control,
            graphics,
            driver,
            Arc::new(compat),
            Arc::new(device_nodes),
        ]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Selected {
    Gpu(GpuHandle),
    Mig(GpuHandle, u32),
}

fn select(inventory: &Inventory, id: &Identifier) -> NvcdiResult<Vec<(Selected, DeviceSpecGenerator)>> {
    let gpu = |handle| (Selected::Gpu(handle), DeviceSpecGenerator::FullGpu { gpu: handle, extra: Vec::new() });
    let mig = |parent, mig| (Selected::Mig(parent, mig), DeviceSpecGenerator::Mig { parent, mig });

    let selected = match id {
        Identifier::None => Vec::new(),
        Identifier::All => {
            let mut all = Vec::new();
            for handle in inventory.handles() {
                let record = inventory.gpu(handle);
                if record.mig_enabled {
                    all.extend(record.migs.iter().map(|m| mig(handle, m.index)));
                } else {
                    all.push(gpu(handle));
                }
            }
            all
        }
        Identifier::GpuIndex(index) => vec![gpu(inventory.by_index(*index)?)],
        Identifier::MigIndex { gpu: index, mig: mig_index } => {
            let parent = inventory.by_index(*index)?;
            if inventory.gpu(parent).mig(*mig_index).is_none() {
                return Err(Report::new(NvcdiError::nvml(format!(
                    "GPU {index} has no MIG device {mig_index}"
                ))));
            }
            vec![mig(parent, *mig_index)]
        }
        Identifier::GpuUuid(uuid) | Identifier::MigUuid(uuid) => match inventory.by_uuid(uuid)? {
            UuidMatch::Gpu(handle) => vec![gpu(handle)],
            UuidMatch::Mig { parent, mig: index } => vec![mig(parent, index)],
        },
    };
    Ok(selected)
}

/// The GPU's device node and DRM nodes, with by-path links and folder
/// permissions for them.
pub(crate) fn full_gpu_discoverer(ctx: &Context, gpu: &GpuRecord) -> DiscoverRef {
    let mut paths = vec![format!("/dev/nvidia{}", gpu.minor)];
    let bus_id = gpu.pci_bus_id();
    if let Some(bus_id) = &bus_id {
        paths.extend(drm_device_nodes(&ctx.system_root, bus_id));
    }
    let devices: DiscoverRef = Arc::new(CharDevices::new(&ctx.dev_root, paths));

    let by_path: Option<DiscoverRef> = bus_id.map(|bus_id| {
        Arc::new(ByPathHooks::new(
            &ctx.dev_root,
            bus_id,
            devices.clone(),
            ctx.hook_creator.clone(),
        )) as DiscoverRef
    });
    let permissions = DeviceFolderPermissions::new(devices.clone(), ctx.hook_creator.clone());

    merge(
        [Some(devices), by_path, Some(Arc::new(permissions) as DiscoverRef)]
            .into_iter()
            .flatten(),
    )
}

/// The parent GPU's device node and the GI and CI capability nodes.
pub(crate) fn mig_discoverer(
    ctx: &Context,
    parent: &GpuRecord,
    mig: &MigRecord,
    minors: &MigMinors,
) -> NvcdiResult<DiscoverRef> {
    let gi = MigCap::gpu_instance(parent.minor, mig.gpu_instance_id);
    let ci = MigCap::compute_instance(parent.minor, mig.gpu_instance_id, mig.compute_instance_id);
    let paths = [
        format!("/dev/nvidia{}", parent.minor),
        minors.device_path(&gi).attach_printable("failed to get GI cap device path")?,
        minors.device_path(&ci).attach_printable("failed to get CI cap device path")?,
    ];
    let devices: DiscoverRef = Arc::new(CharDevices::new(&ctx.dev_root, paths));
    let permissions = DeviceFolderPermissions::new(devices.clone(), ctx.hook_creator.clone());
    Ok(merge([devices, Arc::new(permissions) as DiscoverRef]))
}
