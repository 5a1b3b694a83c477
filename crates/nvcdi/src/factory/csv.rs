use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;

use super::nvml::CONTROL_DEVICE_NODES;
use super::Context;
use crate::discover::merge;
use crate::discover::CharDevices;
use crate::discover::CudaCompatHook;
use crate::discover::DiscoverRef;
use crate::discover::LdconfigHook;
use crate::discover::Mounts;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::generator::DeviceSpecGenerator;
use crate::generator::GeneratorArena;
use crate::identifier::is_uuid;
use crate::identifier::Identifier;
use crate::inventory::GpuHandle;
use crate::inventory::Inventory;
use crate::inventory::UuidMatch;
use crate::lookup::FileLocator;
use crate::options::FeatureFlag;
use crate::options::Options;
use crate::tegra::default_csv_files;
use crate::tegra::tegra_discoverer;
use crate::tegra::MountSpecs;

const TEGRA_RELEASE: &str = "/etc/nv_tegra_release";

/// Tegra-based systems described by CSV mount specs, optionally with a
/// discrete GPU next to the iGPU.
#[derive(Debug, Clone)]
pub(crate) struct CsvFactory {
    files: Vec<PathBuf>,
    ignore_patterns: Vec<String>,
    compat_container_root: String,
    single_device: bool,
}

impl CsvFactory {
    pub fn new(options: &Options) -> Self {
        let files = if options.csv_files.is_empty() {
            default_csv_files()
        } else {
            options.csv_files.clone()
        };
        Self {
            files,
            ignore_patterns: options.csv_ignore_patterns.clone(),
            compat_container_root: options.csv_compat_container_root.clone(),
            single_device: options.has_feature(FeatureFlag::DisableMultipleCsvDevices),
        }
    }

    fn mount_specs(&self) -> MountSpecs {
        MountSpecs::from_csv_files(&self.files)
    }

    pub fn generators(
        &self,
        ctx: &Context,
        ids: &[String],
        inventory: Option<Inventory>,
    ) -> NvcdiResult<GeneratorArena> {
        let mixed = match &inventory {
            Some(inventory) if !self.single_device && inventory.len() > 1 => {
                match self.mixed(ctx, ids, inventory) {
                    Ok(generators) => Some(generators),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to create mixed CSV spec generator; falling back to pure CSV implementation: {e:?}"
                        );
                        None
                    }
                }
            }
            _ => None,
        };
        let generators = match mixed {
            Some(generators) => generators,
            None => vec![self.pure(ctx, ids)?],
        };

        let mut arena = GeneratorArena::new(inventory);
        for generator in generators {
            arena.push(generator);
        }
        Ok(arena)
    }

    /// A single device named `all` holding every CSV device node.
    fn pure(&self, ctx: &Context, ids: &[String]) -> NvcdiResult<DeviceSpecGenerator> {
        if let Some(id) = ids.iter().find(|id| !matches!(id.as_str(), "all" | "0")) {
            return Err(Report::new(NvcdiError::UnsupportedDevice {
                id: id.clone(),
                message: "unsupported device id".to_string(),
            }));
        }
        let specs = self.mount_specs().only_device_nodes();
        Ok(DeviceSpecGenerator::All {
            devices: tegra_discoverer(ctx, &specs),
        })
    }

    fn mixed(&self, ctx: &Context, ids: &[String], inventory: &Inventory) -> NvcdiResult<Vec<DeviceSpecGenerator>> {
        let ids: Vec<String> = if ids.iter().any(|id| id == "all") {
            inventory
                .handles()
                .map(|h| inventory.gpu(h).index.to_string())
                .collect()
        } else {
            ids.to_vec()
        };

        let mut seen = HashSet::new();
        let mut generators = Vec::new();
        for id in &ids {
            let Some(handle) = select(inventory, id).change_context_lazy(|| NvcdiError::InvalidIdentifier {
                id: id.clone(),
                message: "failed to create device spec generator".to_string(),
            })?
            else {
                continue;
            };
            if seen.insert(handle) {
                generators.push(self.mixed_generator(ctx, inventory, handle, id)?);
            }
        }
        Ok(generators)
    }

    fn mixed_generator(
        &self,
        ctx: &Context,
        inventory: &Inventory,
        handle: GpuHandle,
        id: &str,
    ) -> NvcdiResult<DeviceSpecGenerator> {
        let gpu = inventory.gpu(handle);
        let specs = self.mount_specs().only_device_nodes();
        let unexpected = |kind: &str| {
            Report::new(NvcdiError::UnsupportedDevice {
                id: id.to_string(),
                message: format!("unexpected device index for {kind}: {}", gpu.index),
            })
        };

        if gpu.is_integrated() {
            if gpu.index != 0 {
                return Err(unexpected("iGPU"));
            }
            // The iGPU is exposed through the display node instead of the
            // dGPU's regular node.
            let specs = specs
                .without(&MountSpecs::device_nodes(["/dev/nvidia1"]))
                .merge(MountSpecs::device_nodes(["/dev/nvidia2"]));
            return Ok(DeviceSpecGenerator::Csv {
                index: gpu.index,
                uuid: gpu.uuid.clone(),
                devices: tegra_discoverer(ctx, &specs),
            });
        }

        if gpu.index != 1 {
            return Err(unexpected("dGPU"));
        }
        let specs = specs
            .without_regular_device_nodes()
            .without(&MountSpecs::device_nodes(CONTROL_DEVICE_NODES.iter().copied()));
        let control: DiscoverRef = Arc::new(CharDevices::new(&ctx.dev_root, CONTROL_DEVICE_NODES.iter().copied()));
        Ok(DeviceSpecGenerator::FullGpu {
            gpu: handle,
            extra: vec![control, tegra_discoverer(ctx, &specs)],
        })
    }

    /// Driver libraries and symlinks from the CSV files, the release file,
    /// the CUDA compat hook when NVML was available, and a final ldcache
    /// update covering the created symlinks.
    pub fn common_edits(&self, ctx: &Context, inventory: Option<&Inventory>) -> DiscoverRef {
        let specs = self
            .mount_specs()
            .without_device_nodes()
            .ignore_symlinks(&self.ignore_patterns);
        let driver = tegra_discoverer(ctx, &specs);

        let release: DiscoverRef = Arc::new(Mounts::new(
            Arc::new(FileLocator::new(ctx.driver_root()).optional()),
            ctx.driver_root(),
            [TEGRA_RELEASE],
        ));

        let compat: Option<DiscoverRef> = inventory.and_then(|inventory| {
            let Some(version) = inventory.cuda_driver_version else {
                tracing::warn!("Skipping CUDA Forward Compat hook creation: unknown host CUDA version");
                return None;
            };
            let root = inventory.has_orin().then(|| self.compat_container_root.clone());
            Some(Arc::new(CudaCompatHook::new(ctx.hook_creator.clone(), Some(version), root)) as DiscoverRef)
        });

        let ldcache: DiscoverRef = Arc::new(LdconfigHook::new(
            driver.clone(),
            ctx.hook_creator.clone(),
            ctx.ldconfig_path.clone(),
        ));

        merge(
            [Some(driver), Some(release), compat, Some(ldcache)]
                .into_iter()
                .flatten(),
        )
    }
}

/// Resolves a mixed-mode identifier to a full GPU; MIG devices are not
/// supported on these systems.
fn select(inventory: &Inventory, id: &str) -> NvcdiResult<Option<GpuHandle>> {
    let uuid_match = |uuid: &str| -> NvcdiResult<Option<GpuHandle>> {
        match inventory.by_uuid(uuid)? {
            UuidMatch::Gpu(handle) => Ok(Some(handle)),
            UuidMatch::Mig { .. } => Err(mig_unsupported(id)),
        }
    };
    match id.parse::<Identifier>() {
        Ok(Identifier::None) => Ok(None),
        Ok(Identifier::GpuIndex(index)) => inventory.by_index(index).map(Some),
        Ok(Identifier::GpuUuid(uuid)) => uuid_match(&uuid),
        Ok(Identifier::MigIndex { .. }) | Ok(Identifier::MigUuid(_)) => Err(mig_unsupported(id)),
        Ok(Identifier::All) => Err(Report::new(NvcdiError::InvalidIdentifier {
            id: id.to_string(),
            message: "identifier is not a valid UUID or index".to_string(),
        })),
        // iGPUs report bare UUIDs.
        Err(_) if is_uuid(id) => uuid_match(id),
        Err(e) => Err(e),
    }
}

fn mig_unsupported(id: &str) -> Report<NvcdiError> {
    Report::new(NvcdiError::UnsupportedDevice {
        id: id.to_string(),
        message: format!("generating a CDI spec for MIG id {id:?} is not supported in CSV mode"),
    })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::inventory::GpuRecord;
    use crate::mode::Mode;
    use crate::nvml::PciInfo;
    use crate::test_support::FakeHost;

    const IGPU_UUID: &str = "2f0ac4e6-8b3a-5a25-b3f6-8e3c2b6b3a10";
    const DGPU_UUID: &str = "GPU-9b2c6a1e-1f2d-4b8f-a8b4-0a9c3d2e1f00";

    fn csv_host() -> FakeHost {
        let host = FakeHost::new();
        host.char_device("/dev/nvidia0")
            .char_device("/dev/nvidia1")
            .char_device("/dev/nvidia2")
            .char_device("/dev/nvidiactl")
            .char_device("/dev/nvidia-uvm")
            .char_device("/dev/nvhost-ctrl")
            .file("/usr/lib/aarch64-linux-gnu/nvidia/libcuda.so.1.1", "")
            .symlink("libcuda.so.1.1", "/usr/lib/aarch64-linux-gnu/nvidia/libcuda.so.1")
            .file("/etc/nv_tegra_release", "# R36 (release)\n")
            .file(
                "/etc/nvidia-container-runtime/host-files-for-container.d/devices.csv",
                "dev, /dev/nvidia0\n\
                 dev, /dev/nvidia1\n\
                 dev, /dev/nvidiactl\n\
                 dev, /dev/nvidia-uvm\n\
                 dev, /dev/nvhost-ctrl\n",
            )
            .file(
                "/etc/nvidia-container-runtime/host-files-for-container.d/drivers.csv",
                "lib, /usr/lib/aarch64-linux-gnu/nvidia/libcuda.so.1.1\n\
                 sym, /usr/lib/aarch64-linux-gnu/nvidia/libcuda.so.1\n",
            );
        host
    }

    fn options(host: &FakeHost) -> Options {
        let mut options = host.options();
        options.csv_files = vec![
            host.path("/etc/nvidia-container-runtime/host-files-for-container.d/devices.csv"),
            host.path("/etc/nvidia-container-runtime/host-files-for-container.d/drivers.csv"),
        ];
        options
    }

    fn gpu(index: u32, uuid: &str, name: &str, bus: u32) -> GpuRecord {
        GpuRecord {
            index,
            uuid: uuid.to_string(),
            minor: index,
            pci: Some(PciInfo {
                bus_id: format!("00000000:{bus:02X}:00.0"),
                domain: 0,
                bus,
                device: 0,
            }),
            name: name.to_string(),
            mig_enabled: false,
            migs: Vec::new(),
        }
    }

    fn mixed_inventory() -> Inventory {
        Inventory::new(
            "540.4.0",
            Some(12060),
            vec![
                gpu(0, IGPU_UUID, "NVIDIA Thor", 1),
                gpu(1, DGPU_UUID, "NVIDIA RTX 6000", 2),
            ],
        )
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn device_paths(device: &crate::cdi::Device) -> Vec<String> {
        device
            .container_edits
            .device_nodes
            .iter()
            .map(|n| n.path.clone())
            .collect()
    }

    #[test]
    fn pure_csv_yields_one_all_device() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        let arena = CsvFactory::new(&options)
            .generators(&ctx, &ids(&["all"]), None)
            .unwrap();
        let devices = arena.device_specs(&ctx).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "all");
        assert_eq!(
            device_paths(&devices[0]),
            vec!["/dev/nvidia0", "/dev/nvidia1", "/dev/nvidiactl", "/dev/nvidia-uvm", "/dev/nvhost-ctrl"]
        );
        assert!(devices[0].container_edits.mounts.is_empty());
    }

    #[test]
    fn pure_csv_rejects_other_ids() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        let err = CsvFactory::new(&options)
            .generators(&ctx, &ids(&["1"]), None)
            .unwrap_err();
        assert_eq!(
            err.current_context().to_string(),
            "unsupported device id \"1\": unsupported device id"
        );
    }

    #[test]
    fn mixed_mode_splits_igpu_and_dgpu() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        let arena = CsvFactory::new(&options)
            .generators(&ctx, &ids(&["all"]), Some(mixed_inventory()))
            .unwrap();
        let devices = arena.device_specs(&ctx).unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["0", "1"]);

        assert_eq!(
            device_paths(&devices[0]),
            vec!["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm", "/dev/nvhost-ctrl", "/dev/nvidia2"]
        );
        assert_eq!(
            device_paths(&devices[1]),
            vec!["/dev/nvidia1", "/dev/nvidia-uvm", "/dev/nvidiactl", "/dev/nvhost-ctrl"]
        );
    }

    #[test]
    fn mixed_mode_accepts_bare_and_prefixed_uuids() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        let factory = CsvFactory::new(&options);
        let arena = factory
            .generators(&ctx, &ids(&[IGPU_UUID, DGPU_UUID]), Some(mixed_inventory()))
            .unwrap();
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn mixed_mode_rejects_mig_ids() {
        let err = select(&mixed_inventory(), "1:0").unwrap_err();
        assert_eq!(
            err.current_context().to_string(),
            "unsupported device id \"1:0\": generating a CDI spec for MIG id \"1:0\" is not supported in CSV mode"
        );
    }

    #[test]
    fn mixed_failure_falls_back_to_pure_csv() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        // The dGPU must sit at index 1.
        let inventory = Inventory::new(
            "540.4.0",
            None,
            vec![
                gpu(0, IGPU_UUID, "NVIDIA Thor", 1),
                gpu(1, DGPU_UUID, "NVIDIA RTX 6000", 2),
                gpu(2, "GPU-00000000-0000-0000-0000-000000000002", "NVIDIA RTX 6000", 3),
            ],
        );
        let arena = CsvFactory::new(&options)
            .generators(&ctx, &ids(&["all"]), Some(inventory))
            .unwrap();
        let devices = arena.device_specs(&ctx).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "all");
        assert!(arena.inventory().is_some());
    }

    #[test]
    fn single_device_flag_forces_pure_csv() {
        let host = csv_host();
        let mut options = options(&host);
        options.feature_flags = vec![FeatureFlag::DisableMultipleCsvDevices];
        let ctx = Context::new(Mode::Csv, &options);
        let arena = CsvFactory::new(&options)
            .generators(&ctx, &ids(&["0"]), Some(mixed_inventory()))
            .unwrap();
        let devices = arena.device_specs(&ctx).unwrap();
        assert_eq!(devices[0].name, "all");
    }

    #[test]
    fn common_edits_mount_libraries_and_hooks() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        let inventory = Inventory::new(
            "540.4.0",
            Some(12060),
            vec![gpu(0, IGPU_UUID, "Orin (nvgpu)", 1)],
        );
        let common = CsvFactory::new(&options).common_edits(&ctx, Some(&inventory));

        assert!(common.devices().unwrap().is_empty());
        let mounts: Vec<_> = common.mounts().unwrap().into_iter().map(|m| m.path).collect();
        assert_eq!(
            mounts,
            vec![
                "/usr/lib/aarch64-linux-gnu/nvidia/libcuda.so.1.1",
                "/usr/lib/aarch64-linux-gnu/nvidia/libcuda.so.1.1",
                "/etc/nv_tegra_release",
            ]
        );

        let hooks: Vec<_> = common.hooks().unwrap().into_iter().map(|h| h.args).collect();
        assert_eq!(hooks.len(), 3);
        assert_eq!(hooks[0][1], "create-symlinks");
        assert_eq!(hooks[1][1], "enable-cuda-compat");
        assert!(hooks[1].contains(&"--cuda-compat-container-root=/usr/local/cuda/compat_orin".to_string()));
        assert_eq!(hooks[2][1], "update-ldcache");
    }

    #[test]
    fn common_edits_skip_compat_without_nvml() {
        let host = csv_host();
        let options = options(&host);
        let ctx = Context::new(Mode::Csv, &options);
        let hooks = CsvFactory::new(&options).common_edits(&ctx, None).hooks().unwrap();
        let names: Vec<_> = hooks.iter().map(|h| h.args[1].as_str()).collect();
        assert_eq!(names, vec!["create-symlinks", "update-ldcache"]);
    }
}
