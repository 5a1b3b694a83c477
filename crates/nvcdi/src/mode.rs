use std::str::FromStr;

use error_stack::Report;
use serde::Deserialize;

use crate::error::NvcdiError;
use crate::platform::PlatformInfo;

/// How devices are discovered on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, derive_more::Display, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    #[display("auto")]
    Auto,
    #[display("nvml")]
    Nvml,
    #[display("csv")]
    Csv,
    #[display("wsl")]
    Wsl,
    #[display("management")]
    Management,
    #[display("gdrcopy")]
    Gdrcopy,
    #[display("gds")]
    Gds,
    #[display("mofed")]
    Mofed,
    #[display("nvswitch")]
    Nvswitch,
    #[display("imex")]
    Imex,
}

impl FromStr for Mode {
    type Err = Report<NvcdiError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "nvml" => Ok(Self::Nvml),
            "csv" => Ok(Self::Csv),
            "wsl" => Ok(Self::Wsl),
            "management" => Ok(Self::Management),
            "gdrcopy" => Ok(Self::Gdrcopy),
            "gds" => Ok(Self::Gds),
            "mofed" => Ok(Self::Mofed),
            "nvswitch" => Ok(Self::Nvswitch),
            "imex" => Ok(Self::Imex),
            _ => Err(Report::new(NvcdiError::InvalidMode {
                mode: s.to_string(),
            })),
        }
    }
}

impl Mode {
    /// Resolves `auto` to a concrete mode from what the platform reports.
    pub fn resolve(self, platform: &dyn PlatformInfo) -> Mode {
        if self != Mode::Auto {
            return self;
        }
        let mode = if platform.has_nvml() {
            Mode::Nvml
        } else if platform.is_tegra() {
            Mode::Csv
        } else if platform.has_dxcore() {
            Mode::Wsl
        } else {
            tracing::warn!("Unsupported platform detected; falling back to nvml mode");
            Mode::Nvml
        };
        tracing::info!("Auto-detected mode as '{mode}'");
        mode
    }

    pub fn default_vendor(self) -> &'static str {
        match self {
            Mode::Management => "management.nvidia.com",
            _ => "nvidia.com",
        }
    }

    pub fn default_class(self) -> &'static str {
        match self {
            Mode::Imex => "imex-channel",
            Mode::Gdrcopy => "gdrcopy",
            Mode::Gds => "gds",
            Mode::Mofed => "mofed",
            Mode::Nvswitch => "nvswitch",
            _ => "gpu",
        }
    }
}
