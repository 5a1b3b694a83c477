//! The public entry point: resolves the mode once and assembles CDI specs.

use std::sync::Arc;

use error_stack::ResultExt;

use crate::cdi;
use crate::discover::merge;
use crate::discover::DiscoverRef;
use crate::discover::EnvVars;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::factory::Context;
use crate::factory::Factory;
use crate::factory::NvmlUsage;
use crate::inventory::Inventory;
use crate::mode::Mode;
use crate::nvml::NvmlLibrary;
use crate::nvml::NvmlProvider;
use crate::options::Options;
use crate::platform::HostPlatform;
use crate::platform::PlatformInfo;
use crate::requests::ContainerRequest;
use crate::spec::Spec;
use crate::transform::driver_root_transformer;
use crate::transform::Transform;

const VISIBLE_DEVICES_VOID: &str = "NVIDIA_VISIBLE_DEVICES=void";

/// Generates CDI specs for the devices of one host.
#[derive(Debug)]
pub struct Library {
    mode: Mode,
    vendor: String,
    class: String,
    options: Options,
    ctx: Context,
    factory: Factory,
    nvml: Arc<dyn NvmlProvider>,
}

impl Library {
    /// Uses the system NVML library and inspects the host below the driver root.
    pub fn new(options: Options) -> Self {
        let nvml: Arc<dyn NvmlProvider> = Arc::new(NvmlLibrary::new(options.nvml_lib_path.clone()));
        let platform = HostPlatform::new(&options.driver_root, nvml.as_ref());
        let mode = options.mode.resolve(&platform);
        Self::with_mode(options, nvml, mode)
    }

    pub fn with_providers(options: Options, nvml: Arc<dyn NvmlProvider>, platform: &dyn PlatformInfo) -> Self {
        let mode = options.mode.resolve(platform);
        Self::with_mode(options, nvml, mode)
    }

    fn with_mode(options: Options, nvml: Arc<dyn NvmlProvider>, mode: Mode) -> Self {
        let vendor = options
            .vendor
            .clone()
            .unwrap_or_else(|| mode.default_vendor().to_string());
        let class = options
            .class
            .clone()
            .unwrap_or_else(|| mode.default_class().to_string());
        tracing::debug!("Using mode {mode} for {vendor}/{class}");

        Self {
            mode,
            vendor,
            class,
            ctx: Context::new(mode, &options),
            factory: Factory::new(mode, &options),
            options,
            nvml,
        }
    }

    /// The resolved mode; never `auto`.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn kind(&self) -> String {
        format!("{}/{}", self.vendor, self.class)
    }

    /// The complete spec for `ids`, or for every device if `ids` is empty.
    pub fn get_spec(&self, ids: &[String]) -> NvcdiResult<Spec> {
        let ids = if ids.is_empty() {
            vec!["all".to_string()]
        } else {
            requested(ids)
        };

        let inventory = self.inventory()?;
        let (devices, inventory) = if ids.is_empty() {
            (Vec::new(), inventory)
        } else {
            let arena = self.factory.generators(&self.ctx, &ids, inventory)?;
            let devices = arena
                .device_specs(&self.ctx)
                .attach_printable("failed to create device CDI specs")?;
            (devices, arena.take_inventory())
        };

        let edits = self.common_edits(inventory.as_ref(), vec![VISIBLE_DEVICES_VOID.to_string()])?;

        let mut spec = Spec::builder()
            .devices(devices)
            .edits(edits)
            .vendor(self.vendor.clone())
            .class(self.class.clone())
            .merged_device(self.options.merged_device.clone())
            .build()?;
        self.transform_roots(&mut spec)?;
        Ok(spec)
    }

    /// Device specs for `ids`; `none` entries are ignored.
    pub fn get_device_specs_by_id(&self, ids: &[String]) -> NvcdiResult<Vec<cdi::Device>> {
        let ids = requested(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let arena = self.factory.generators(&self.ctx, &ids, self.inventory()?)?;
        arena.device_specs(&self.ctx)
    }

    /// Edits shared by every device of the spec.
    pub fn get_common_edits(&self) -> NvcdiResult<cdi::ContainerEdits> {
        let inventory = self.inventory()?;
        self.common_edits(inventory.as_ref(), Vec::new())
    }

    /// Fully-qualified names of the devices of the complete spec.
    pub fn list_devices(&self) -> NvcdiResult<Vec<String>> {
        let spec = self.get_spec(&[])?;
        Ok(spec
            .raw()
            .devices
            .iter()
            .map(|d| cdi::qualified_name(&self.vendor, &self.class, &d.name))
            .collect())
    }

    /// The ids a container asks for, in the form `get_spec` accepts.
    pub fn requested_ids(&self, request: &ContainerRequest) -> Vec<String> {
        match self.mode {
            Mode::Imex => request.imex_channels(),
            _ => request.device_ids(&self.kind()),
        }
    }

    fn transform_roots(&self, spec: &mut Spec) -> NvcdiResult<()> {
        if self.options.target_driver_root.is_none() && self.options.target_dev_root.is_none() {
            return Ok(());
        }
        let driver_root = self.ctx.driver_root();
        let target_driver_root = self.options.target_driver_root.as_deref().unwrap_or(driver_root);
        let transformers = driver_root_transformer(
            driver_root,
            target_driver_root,
            Some(self.ctx.dev_root.as_path()),
            self.options.target_dev_root.as_deref(),
        );
        transformers[..]
            .transform(spec.raw_mut())
            .attach_printable("failed to transform driver root in CDI spec")
    }

    fn common_edits(&self, inventory: Option<&Inventory>, env: Vec<String>) -> NvcdiResult<cdi::ContainerEdits> {
        let discoverer = self
            .factory
            .common_edits(&self.ctx, inventory)
            .attach_printable("failed to create discoverer for common entities")?;
        let discoverer = merge([discoverer, Arc::new(EnvVars(env)) as DiscoverRef]);
        self.ctx
            .edits
            .from_discoverer(discoverer.as_ref())
            .attach_printable("failed to create container edits for common entities")
    }

    /// Captures the NVML state needed for one call. The session is closed
    /// before returning.
    fn inventory(&self) -> NvcdiResult<Option<Inventory>> {
        let usage = self.factory.nvml_usage();
        if usage == NvmlUsage::Unused {
            return Ok(None);
        }

        let captured = self
            .nvml
            .open()
            .change_context(NvcdiError::nvml("failed to initialize NVML"))
            .and_then(|session| Inventory::capture(session.as_ref()));
        match captured {
            Ok(inventory) => Ok(Some(inventory)),
            Err(e) if usage == NvmlUsage::Optional => {
                tracing::info!("NVML is not available; continuing without it: {e:?}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn requested(ids: &[String]) -> Vec<String> {
    ids.iter().filter(|id| id.as_str() != "none").cloned().collect()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use std::path::PathBuf;

    use super::*;
    use crate::discover::HookName;
    use crate::namer::DeviceNamer;
    use crate::nvml::mock::MockGpu;
    use crate::nvml::mock::MockNvml;
    use crate::options::MergedDeviceOptions;
    use crate::requests::RequestOptions;
    use crate::test_support::FakeHost;

    struct FakePlatform {
        nvml: bool,
        tegra: bool,
    }

    impl PlatformInfo for FakePlatform {
        fn has_nvml(&self) -> bool {
            self.nvml
        }

        fn is_tegra(&self) -> bool {
            self.tegra
        }

        fn has_dxcore(&self) -> bool {
            false
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn gpu_host() -> FakeHost {
        let host = FakeHost::new();
        host.char_device("/dev/nvidia0")
            .char_device("/dev/nvidia1")
            .char_device("/dev/nvidiactl")
            .file("/usr/lib64/libcuda.so.550.54.14", "")
            .file("/usr/lib64/libnvidia-ml.so.550.54.14", "");
        host
    }

    fn nvml_library(options: Options, gpus: Vec<MockGpu>) -> Library {
        Library::with_providers(
            options,
            Arc::new(MockNvml::with_gpus(gpus)),
            &FakePlatform {
                nvml: true,
                tegra: false,
            },
        )
    }

    #[test_log::test]
    fn resolves_auto_mode_and_defaults() {
        let host = FakeHost::new();
        let lib = Library::with_providers(
            host.options(),
            Arc::new(MockNvml::unavailable()),
            &FakePlatform {
                nvml: false,
                tegra: true,
            },
        );
        assert_eq!(lib.mode(), Mode::Csv);
        assert_eq!(lib.kind(), "nvidia.com/gpu");

        let mut options = host.options();
        options.mode = Mode::Imex;
        options.vendor = Some("example.com".to_string());
        let lib = Library::with_providers(options, Arc::new(MockNvml::unavailable()), &FakePlatform { nvml: true, tegra: false });
        assert_eq!(lib.mode(), Mode::Imex);
        assert_eq!(lib.vendor(), "example.com");
        assert_eq!(lib.class(), "imex-channel");
    }

    #[test_log::test]
    fn single_gpu_spec() {
        let host = gpu_host();
        let lib = nvml_library(host.options(), vec![MockGpu::new(0)]);
        let spec = lib.get_spec(&ids(&["0"])).unwrap();
        let raw = spec.raw();

        assert_eq!(raw.kind, "nvidia.com/gpu");
        let names: Vec<_> = raw.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["0"]);
        let nodes: Vec<_> = raw.devices[0]
            .container_edits
            .device_nodes
            .iter()
            .map(|n| n.path.as_str())
            .collect();
        assert_eq!(nodes, vec!["/dev/nvidia0"]);
        assert!(raw.container_edits.env.contains(&VISIBLE_DEVICES_VOID.to_string()));
        assert!(raw
            .container_edits
            .device_nodes
            .iter()
            .any(|n| n.path == "/dev/nvidiactl"));
    }

    #[test_log::test]
    fn all_devices_with_merged_device() {
        let host = gpu_host();
        let mut options = host.options();
        options.merged_device = Some(MergedDeviceOptions::default());
        let lib = nvml_library(options, vec![MockGpu::new(0), MockGpu::new(1)]);

        assert_eq!(
            lib.list_devices().unwrap(),
            vec!["nvidia.com/gpu=0", "nvidia.com/gpu=1", "nvidia.com/gpu=all"]
        );
        let spec = lib.get_spec(&[]).unwrap();
        let all = spec.raw().devices.iter().find(|d| d.name == "all").unwrap();
        let nodes: Vec<_> = all.container_edits.device_nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(nodes, vec!["/dev/nvidia0", "/dev/nvidia1"]);
    }

    #[test]
    fn target_driver_root_rewrites_host_paths() {
        let host = gpu_host();
        let mut options = host.options();
        options.target_driver_root = Some(PathBuf::from("/host"));
        let lib = nvml_library(options, vec![MockGpu::new(0)]);

        let spec = lib.get_spec(&ids(&["0"])).unwrap();
        let raw = spec.raw();
        let node = &raw.devices[0].container_edits.device_nodes[0];
        assert_eq!(node.path, "/dev/nvidia0");
        assert_eq!(node.host_path.as_deref(), Some("/host/dev/nvidia0"));
        assert!(raw
            .container_edits
            .mounts
            .iter()
            .any(|m| m.host_path == "/host/usr/lib64/libcuda.so.550.54.14"));
    }

    #[test]
    fn none_gives_no_devices() {
        let host = gpu_host();
        let lib = nvml_library(host.options(), vec![MockGpu::new(0)]);
        assert!(lib.get_device_specs_by_id(&ids(&["none"])).unwrap().is_empty());
        let spec = lib.get_spec(&ids(&["none"])).unwrap();
        assert!(spec.raw().devices.is_empty());

        let mut options = host.options();
        options.merged_device = Some(MergedDeviceOptions::default());
        let lib = nvml_library(options, vec![MockGpu::new(0)]);
        let spec = lib.get_spec(&ids(&["none"])).unwrap();
        assert!(spec.raw().devices.is_empty());
    }

    #[test]
    fn clashing_device_names_are_rejected() {
        let host = gpu_host();
        let mut options = host.options();
        options.device_namers = vec![DeviceNamer::Index, DeviceNamer::Index];
        let lib = nvml_library(options, vec![MockGpu::new(0)]);
        let err = lib.get_spec(&ids(&["0"])).unwrap_err();
        assert!(format!("{err:?}").contains("duplicate device name"));
    }

    #[test]
    fn uuid_and_index_give_identical_edits() {
        let host = gpu_host();
        let lib = nvml_library(host.options(), vec![MockGpu::new(0)]);
        let uuid = MockGpu::new(0).uuid;
        let by_index = lib.get_device_specs_by_id(&ids(&["0"])).unwrap();
        let by_uuid = lib.get_device_specs_by_id(&[uuid]).unwrap();
        assert_eq!(by_index[0].container_edits, by_uuid[0].container_edits);
    }

    #[test]
    fn nvml_mode_requires_nvml() {
        let host = gpu_host();
        let mut options = host.options();
        options.mode = Mode::Nvml;
        let lib = Library::with_providers(options, Arc::new(MockNvml::unavailable()), &FakePlatform { nvml: false, tegra: false });
        let err = lib.get_spec(&[]).unwrap_err();
        assert!(format!("{err:?}").contains("failed to initialize NVML"));
    }

    #[test_log::test]
    fn csv_mode_without_nvml() {
        let host = FakeHost::new();
        host.char_device("/dev/nvhost-gpu")
            .file("/csv/devices.csv", "dev, /dev/nvhost-gpu\n");
        let mut options = host.options();
        options.mode = Mode::Csv;
        options.csv_files = vec![host.path("/csv/devices.csv")];
        options.disabled_hooks = vec![HookName::All];
        let lib = Library::with_providers(options, Arc::new(MockNvml::unavailable()), &FakePlatform { nvml: false, tegra: true });

        let spec = lib.get_spec(&ids(&["all"])).unwrap();
        let raw = spec.raw();
        assert_eq!(raw.devices.len(), 1);
        assert_eq!(raw.devices[0].name, "all");
        let nodes: Vec<_> = raw.devices[0]
            .container_edits
            .device_nodes
            .iter()
            .map(|n| n.path.as_str())
            .collect();
        assert_eq!(nodes, vec!["/dev/nvhost-gpu"]);
        assert_eq!(raw.container_edits.env, vec![VISIBLE_DEVICES_VOID.to_string()]);
    }

    #[test]
    fn gated_mode_has_empty_common_edits() {
        let host = FakeHost::new();
        host.char_device("/dev/gdrdrv");
        let mut options = host.options();
        options.mode = Mode::Gdrcopy;
        let lib = Library::with_providers(options, Arc::new(MockNvml::unavailable()), &FakePlatform { nvml: false, tegra: false });

        assert!(lib.get_common_edits().unwrap().is_empty());
        let spec = lib.get_spec(&[]).unwrap();
        assert_eq!(spec.raw().kind, "nvidia.com/gdrcopy");
        assert_eq!(spec.raw().devices[0].name, "all");
    }

    #[test]
    fn requested_ids_follow_mode() {
        let host = gpu_host();
        let request = ContainerRequest::new(RequestOptions::default())
            .with_env(&["NVIDIA_VISIBLE_DEVICES=nvidia.com/gpu=1,0", "NVIDIA_IMEX_CHANNELS=3"])
            .unwrap();

        let lib = nvml_library(host.options(), vec![MockGpu::new(0)]);
        assert_eq!(lib.requested_ids(&request), vec!["1", "0"]);

        let mut options = host.options();
        options.mode = Mode::Imex;
        let lib = Library::with_providers(options, Arc::new(MockNvml::unavailable()), &FakePlatform { nvml: false, tegra: false });
        assert_eq!(lib.requested_ids(&request), vec!["3"]);
    }
}
