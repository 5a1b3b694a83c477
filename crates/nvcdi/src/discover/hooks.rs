use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use error_stack::Report;
use serde::Deserialize;

use super::Hook;
use crate::error::NvcdiError;

pub const CREATE_CONTAINER: &str = "createContainer";

/// Disabled unless explicitly enabled.
const DEFAULT_DISABLED_HOOKS: &[HookName] = &[HookName::Chmod];

/// Hooks that the CDI hook binary implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookName {
    #[display("all")]
    All,
    #[display("chmod")]
    Chmod,
    #[display("create-symlinks")]
    CreateSymlinks,
    #[display("disable-device-node-modification")]
    DisableDeviceNodeModification,
    #[display("enable-cuda-compat")]
    EnableCudaCompat,
    #[display("update-ldcache")]
    UpdateLdcache,
}

impl FromStr for HookName {
    type Err = Report<NvcdiError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "chmod" => Ok(Self::Chmod),
            "create-symlinks" => Ok(Self::CreateSymlinks),
            "disable-device-node-modification" => Ok(Self::DisableDeviceNodeModification),
            "enable-cuda-compat" => Ok(Self::EnableCudaCompat),
            "update-ldcache" => Ok(Self::UpdateLdcache),
            _ => Err(Report::new(NvcdiError::InvalidOption {
                message: format!("unknown hook {s:?}"),
            })),
        }
    }
}

/// Builds `createContainer` hooks that invoke the CDI hook binary.
#[derive(Debug, Clone)]
pub struct HookCreator {
    path: String,
    fixed_args: Vec<String>,
    all_disabled: bool,
    disabled: HashMap<HookName, bool>,
}

impl HookCreator {
    pub fn new(path: impl Into<String>, enabled: &[HookName], disabled: &[HookName]) -> Self {
        let path = path.into();
        let base = Path::new(&path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("nvidia-cdi-hook")
            .to_string();
        let fixed_args = if base == "nvidia-ctk" {
            vec![base, "hook".to_string()]
        } else {
            vec![base]
        };

        let mut all_disabled = false;
        let mut state = HashMap::new();
        for hook in disabled.iter().chain(DEFAULT_DISABLED_HOOKS) {
            match hook {
                HookName::All => all_disabled = true,
                hook => {
                    state.insert(*hook, true);
                }
            }
        }
        for hook in enabled {
            match hook {
                HookName::All => all_disabled = false,
                hook => {
                    state.insert(*hook, false);
                }
            }
        }

        Self {
            path,
            fixed_args,
            all_disabled,
            disabled: state,
        }
    }

    /// Creates the named hook, or `None` if it is disabled.
    pub fn create(&self, name: HookName, args: &[String]) -> Option<Hook> {
        if self.is_disabled(name, args) {
            return None;
        }

        let mut hook_args = self.fixed_args.clone();
        hook_args.push(name.to_string());
        match name {
            HookName::CreateSymlinks => {
                for link in args {
                    hook_args.extend(["--link".to_string(), link.clone()]);
                }
            }
            HookName::Chmod => {
                hook_args.extend(["--mode".to_string(), "755".to_string()]);
                for path in args {
                    hook_args.extend(["--path".to_string(), path.clone()]);
                }
            }
            _ => hook_args.extend(args.iter().cloned()),
        }

        Some(Hook {
            lifecycle: super::CREATE_CONTAINER.to_string(),
            path: self.path.clone(),
            args: hook_args,
            env: vec!["NVIDIA_CTK_DEBUG=false".to_string()],
        })
    }

    fn is_disabled(&self, name: HookName, args: &[String]) -> bool {
        if let Some(disabled) = self.disabled.get(&name) {
            return *disabled;
        }
        if self.all_disabled {
            return true;
        }
        matches!(name, HookName::CreateSymlinks | HookName::Chmod) && args.is_empty()
    }
}
