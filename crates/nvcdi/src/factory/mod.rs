//! Per-mode construction of device spec generators and common edits.

mod csv;
mod driver;
mod gated;
mod imex;
mod management;
mod nvml;
mod wsl;

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::discover::DiscoverRef;
use crate::discover::HookCreator;
use crate::discover::HookName;
use crate::edits::EditsFactory;
use crate::error::NvcdiResult;
use crate::generator::GeneratorArena;
use crate::inventory::Inventory;
use crate::lookup::DriverRoot;
use crate::mode::Mode;
use crate::namer::DeviceNamers;
use crate::options::FeatureFlag;
use crate::options::Options;

pub(crate) use self::csv::CsvFactory;
pub(crate) use self::driver::driver_discoverer;
pub(crate) use self::gated::GatedFactory;
pub(crate) use self::imex::ImexFactory;
pub(crate) use self::management::ManagementFactory;
pub(crate) use self::nvml::full_gpu_discoverer;
pub(crate) use self::nvml::mig_discoverer;
pub(crate) use self::nvml::NvmlFactory;
pub(crate) use self::wsl::WslFactory;

/// Settings shared by every mode, resolved once per library.
#[derive(Debug)]
pub(crate) struct Context {
    pub driver: DriverRoot,
    pub dev_root: PathBuf,
    pub system_root: PathBuf,
    pub namers: DeviceNamers,
    pub hook_creator: Arc<HookCreator>,
    pub edits: EditsFactory,
    pub ldconfig_path: Option<String>,
}

impl Context {
    pub fn new(mode: Mode, options: &Options) -> Self {
        let driver_root = resolve_root(&options.driver_root);
        let dev_root = options
            .dev_root
            .as_deref()
            .map(resolve_root)
            .unwrap_or_else(|| driver_root.clone());

        let mut disabled_hooks = options.disabled_hooks.clone();
        if mode == Mode::Management {
            disabled_hooks.extend([HookName::EnableCudaCompat, HookName::DisableDeviceNodeModification]);
        }
        let hook_creator = HookCreator::new(
            options.nvidia_cdi_hook_path.clone(),
            &options.enabled_hooks,
            &disabled_hooks,
        );

        Self {
            driver: DriverRoot::new(driver_root, options.library_search_paths.clone()),
            dev_root,
            system_root: options.system_root.clone(),
            namers: DeviceNamers::new(options.device_namers.clone()),
            hook_creator: Arc::new(hook_creator),
            edits: EditsFactory::new(options.has_feature(FeatureFlag::NoAdditionalGidsForDeviceNodes)),
            ldconfig_path: options.ldconfig_path.clone(),
        }
    }

    pub fn driver_root(&self) -> &Path {
        self.driver.root()
    }
}

/// Roots are compared against resolved symlink targets, so resolve them too.
fn resolve_root(root: &Path) -> PathBuf {
    match fs::canonicalize(root) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!("Failed to resolve root {}: {e}", root.display());
            root.to_path_buf()
        }
    }
}

/// How a mode uses NVML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NvmlUsage {
    Required,
    Optional,
    Unused,
}

/// Mode dispatch.
#[derive(Debug)]
pub(crate) enum Factory {
    Nvml(NvmlFactory),
    Csv(CsvFactory),
    Wsl(WslFactory),
    Management(ManagementFactory),
    Imex(ImexFactory),
    Gated(GatedFactory),
}

impl Factory {
    /// `mode` must already be resolved.
    pub fn new(mode: Mode, options: &Options) -> Self {
        match mode {
            Mode::Auto | Mode::Nvml => Factory::Nvml(NvmlFactory),
            Mode::Csv => Factory::Csv(CsvFactory::new(options)),
            Mode::Wsl => Factory::Wsl(WslFactory),
            Mode::Management => Factory::Management(ManagementFactory),
            Mode::Imex => Factory::Imex(ImexFactory),
            Mode::Gdrcopy | Mode::Gds | Mode::Mofed | Mode::Nvswitch => {
                Factory::Gated(GatedFactory::new(mode))
            }
        }
    }

    pub fn nvml_usage(&self) -> NvmlUsage {
        match self {
            Factory::Nvml(_) => NvmlUsage::Required,
            Factory::Csv(_) => NvmlUsage::Optional,
            _ => NvmlUsage::Unused,
        }
    }

    /// One generator per requested device; `inventory` is `None` when NVML
    /// is unused or unavailable.
    pub fn generators(
        &self,
        ctx: &Context,
        ids: &[String],
        inventory: Option<Inventory>,
    ) -> NvcdiResult<GeneratorArena> {
        match self {
            Factory::Nvml(f) => f.generators(ids, inventory),
            Factory::Csv(f) => f.generators(ctx, ids, inventory),
            Factory::Wsl(f) => Ok(f.generators(ctx)),
            Factory::Management(f) => f.generators(ctx),
            Factory::Imex(f) => f.generators(ctx, ids),
            Factory::Gated(f) => Ok(f.generators(ctx)),
        }
    }

    /// Edits shared by all devices of the spec.
    pub fn common_edits(&self, ctx: &Context, inventory: Option<&Inventory>) -> NvcdiResult<DiscoverRef> {
        match self {
            Factory::Nvml(f) => f.common_edits(ctx, inventory),
            Factory::Csv(f) => Ok(f.common_edits(ctx, inventory)),
            Factory::Wsl(f) => f.common_edits(ctx),
            Factory::Management(f) => f.common_edits(ctx),
            Factory::Imex(_) | Factory::Gated(_) => Ok(crate::discover::empty()),
        }
    }
}
