use std::path::PathBuf;
use std::str::FromStr;

use error_stack::Report;
use serde::Deserialize;

use crate::discover::HookName;
use crate::error::NvcdiError;
use crate::mode::Mode;
use crate::namer::DeviceNamer;

pub const DEFAULT_NVIDIA_CDI_HOOK_PATH: &str = "/usr/bin/nvidia-cdi-hook";
pub const DEFAULT_CSV_COMPAT_CONTAINER_ROOT: &str = "/usr/local/cuda/compat_orin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureFlag {
    /// Always generate a single CSV device, even on dGPU + iGPU systems.
    #[display("disable-multiple-csv-devices")]
    DisableMultipleCsvDevices,
    #[display("no-additional-gids-for-device-nodes")]
    NoAdditionalGidsForDeviceNodes,
}

impl FromStr for FeatureFlag {
    type Err = Report<NvcdiError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disable-multiple-csv-devices" => Ok(Self::DisableMultipleCsvDevices),
            "no-additional-gids-for-device-nodes" => Ok(Self::NoAdditionalGidsForDeviceNodes),
            _ => Err(Report::new(NvcdiError::InvalidOption {
                message: format!("unknown feature flag {s:?}"),
            })),
        }
    }
}

/// Adds a device combining the edits of every generated device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MergedDeviceOptions {
    pub name: String,
    /// Leave the spec unchanged if a device with `name` already exists.
    pub skip_if_exists: bool,
}

impl Default for MergedDeviceOptions {
    fn default() -> Self {
        Self {
            name: "all".to_string(),
            skip_if_exists: false,
        }
    }
}

/// Options controlling CDI spec generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Options {
    pub mode: Mode,
    pub driver_root: PathBuf,
    /// Root for device nodes; defaults to the driver root.
    pub dev_root: Option<PathBuf>,
    /// Root below which `/proc` and `/sys` are read.
    pub system_root: PathBuf,
    /// Where the driver root is found by the container runtime, if that
    /// differs from where it is seen while generating.
    pub target_driver_root: Option<PathBuf>,
    pub target_dev_root: Option<PathBuf>,
    pub device_namers: Vec<DeviceNamer>,
    pub library_search_paths: Vec<PathBuf>,
    pub csv_files: Vec<PathBuf>,
    pub csv_ignore_patterns: Vec<String>,
    pub csv_compat_container_root: String,
    pub nvidia_cdi_hook_path: String,
    pub ldconfig_path: Option<String>,
    pub feature_flags: Vec<FeatureFlag>,
    pub vendor: Option<String>,
    pub class: Option<String>,
    pub merged_device: Option<MergedDeviceOptions>,
    pub enabled_hooks: Vec<HookName>,
    pub disabled_hooks: Vec<HookName>,
    pub nvml_lib_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: Mode::Auto,
            driver_root: PathBuf::from("/"),
            dev_root: None,
            system_root: PathBuf::from("/"),
            target_driver_root: None,
            target_dev_root: None,
            device_namers: vec![DeviceNamer::Index],
            library_search_paths: Vec::new(),
            csv_files: Vec::new(),
            csv_ignore_patterns: Vec::new(),
            csv_compat_container_root: DEFAULT_CSV_COMPAT_CONTAINER_ROOT.to_string(),
            nvidia_cdi_hook_path: DEFAULT_NVIDIA_CDI_HOOK_PATH.to_string(),
            ldconfig_path: None,
            feature_flags: Vec::new(),
            vendor: None,
            class: None,
            merged_device: None,
            enabled_hooks: Vec::new(),
            disabled_hooks: Vec::new(),
            nvml_lib_path: None,
        }
    }
}

impl Options {
    pub fn has_feature(&self, flag: FeatureFlag) -> bool {
        self.feature_flags.contains(&flag)
    }
}
