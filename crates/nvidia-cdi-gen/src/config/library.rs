use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use nvcdi::DeviceNamer;
use nvcdi::FeatureFlag;
use nvcdi::HookName;
use nvcdi::Mode;
use nvcdi::Options;

use crate::config::nvcdi_error;

/// Options shared by every command that builds a spec. Flags override the
/// values of the config file.
#[derive(Parser, Debug, Default)]
pub struct LibraryArgs {
    #[arg(
        long,
        help = "YAML file with generation options",
        env = "NVIDIA_CDI_CONFIG",
        value_hint = clap::ValueHint::FilePath
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        help = "Discovery mode: auto, nvml, csv, wsl, management, gdrcopy, gds, mofed, nvswitch or imex",
        env = "NVIDIA_CDI_MODE"
    )]
    pub mode: Option<String>,

    #[arg(
        long,
        help = "Root of the NVIDIA driver installation",
        env = "NVIDIA_CDI_DRIVER_ROOT",
        value_hint = clap::ValueHint::DirPath
    )]
    pub driver_root: Option<PathBuf>,

    #[arg(
        long,
        help = "Root of the device nodes; defaults to the driver root",
        env = "NVIDIA_CDI_DEV_ROOT",
        value_hint = clap::ValueHint::DirPath
    )]
    pub dev_root: Option<PathBuf>,

    #[arg(
        long,
        help = "Driver root as seen by the container runtime",
        env = "NVIDIA_CDI_TARGET_DRIVER_ROOT",
        value_hint = clap::ValueHint::DirPath
    )]
    pub target_driver_root: Option<PathBuf>,

    #[arg(
        long,
        help = "Device node root as seen by the container runtime",
        env = "NVIDIA_CDI_TARGET_DEV_ROOT",
        value_hint = clap::ValueHint::DirPath
    )]
    pub target_dev_root: Option<PathBuf>,

    #[arg(
        long = "device-name-strategy",
        help = "How devices are named: index, type-index or uuid",
        env = "NVIDIA_CDI_DEVICE_NAME_STRATEGY",
        value_delimiter = ','
    )]
    pub device_name_strategies: Vec<String>,

    #[arg(
        long = "library-search-path",
        help = "Extra directory to search for driver libraries",
        env = "NVIDIA_CDI_LIBRARY_SEARCH_PATHS",
        value_delimiter = ':'
    )]
    pub library_search_paths: Vec<PathBuf>,

    #[arg(
        long = "csv-file",
        help = "CSV mount spec file used in csv mode",
        env = "NVIDIA_CDI_CSV_FILES",
        value_delimiter = ','
    )]
    pub csv_files: Vec<PathBuf>,

    #[arg(
        long = "csv-ignore-pattern",
        help = "Pattern of CSV symlinks to leave out",
        env = "NVIDIA_CDI_CSV_IGNORE_PATTERNS",
        value_delimiter = ','
    )]
    pub csv_ignore_patterns: Vec<String>,

    #[arg(
        long,
        help = "Path to the nvidia-cdi-hook binary in generated hooks",
        env = "NVIDIA_CDI_HOOK_PATH"
    )]
    pub nvidia_cdi_hook_path: Option<String>,

    #[arg(long, help = "Path to ldconfig on the host", env = "NVIDIA_CDI_LDCONFIG_PATH")]
    pub ldconfig_path: Option<String>,

    #[arg(
        long = "feature-flag",
        help = "Feature flag to enable",
        env = "NVIDIA_CDI_FEATURE_FLAGS",
        value_delimiter = ','
    )]
    pub feature_flags: Vec<String>,

    #[arg(
        long = "enable-hook",
        help = "Hook to emit even if disabled",
        env = "NVIDIA_CDI_ENABLED_HOOKS",
        value_delimiter = ','
    )]
    pub enabled_hooks: Vec<String>,

    #[arg(
        long = "disable-hook",
        help = "Hook to leave out of the spec",
        env = "NVIDIA_CDI_DISABLED_HOOKS",
        value_delimiter = ','
    )]
    pub disabled_hooks: Vec<String>,

    #[arg(long, help = "CDI vendor; defaults by mode", env = "NVIDIA_CDI_VENDOR")]
    pub vendor: Option<String>,

    #[arg(long, help = "CDI class; defaults by mode", env = "NVIDIA_CDI_CLASS")]
    pub class: Option<String>,

    #[arg(
        long,
        help = "Path to libnvidia-ml.so",
        env = "NVIDIA_CDI_NVML_LIB_PATH",
        value_hint = clap::ValueHint::FilePath
    )]
    pub nvml_lib_path: Option<PathBuf>,
}

impl LibraryArgs {
    pub fn options(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => load_config(path)?,
            None => Options::default(),
        };

        if let Some(mode) = &self.mode {
            options.mode = parse(mode)?;
        }
        if let Some(root) = &self.driver_root {
            options.driver_root = root.clone();
        }
        if self.dev_root.is_some() {
            options.dev_root = self.dev_root.clone();
        }
        if self.target_driver_root.is_some() {
            options.target_driver_root = self.target_driver_root.clone();
        }
        if self.target_dev_root.is_some() {
            options.target_dev_root = self.target_dev_root.clone();
        }
        if !self.device_name_strategies.is_empty() {
            options.device_namers = parse_all::<DeviceNamer>(&self.device_name_strategies)?;
        }
        if !self.library_search_paths.is_empty() {
            options.library_search_paths = self.library_search_paths.clone();
        }
        if !self.csv_files.is_empty() {
            options.csv_files = self.csv_files.clone();
        }
        if !self.csv_ignore_patterns.is_empty() {
            options.csv_ignore_patterns = self.csv_ignore_patterns.clone();
        }
        if let Some(path) = &self.nvidia_cdi_hook_path {
            options.nvidia_cdi_hook_path = path.clone();
        }
        if self.ldconfig_path.is_some() {
            options.ldconfig_path = self.ldconfig_path.clone();
        }
        if !self.feature_flags.is_empty() {
            options.feature_flags = parse_all::<FeatureFlag>(&self.feature_flags)?;
        }
        if !self.enabled_hooks.is_empty() {
            options.enabled_hooks = parse_all::<HookName>(&self.enabled_hooks)?;
        }
        if !self.disabled_hooks.is_empty() {
            options.disabled_hooks = parse_all::<HookName>(&self.disabled_hooks)?;
        }
        if self.vendor.is_some() {
            options.vendor = self.vendor.clone();
        }
        if self.class.is_some() {
            options.class = self.class.clone();
        }
        if self.nvml_lib_path.is_some() {
            options.nvml_lib_path = self.nvml_lib_path.clone();
        }
        Ok(options)
    }
}

fn load_config(path: &Path) -> Result<Options> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    value.parse().map_err(nvcdi_error)
}

fn parse_all<T>(values: &[String]) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    values.iter().map(|v| parse(v.trim())).collect()
}
