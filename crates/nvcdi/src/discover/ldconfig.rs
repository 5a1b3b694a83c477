use std::path::Path;
use std::sync::Arc;

use super::Discover;
use super::DiscoverRef;
use super::Hook;
use super::HookCreator;
use super::HookName;
use crate::error::NvcdiResult;

/// Whether a file name looks like a shared library (`lib?*.so[.*]`).
pub fn is_library_name(path: &str) -> bool {
    let Some(base) = Path::new(path).file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let matches = glob::Pattern::new("lib?*.so*").is_ok_and(|p| p.matches(base));
    if !matches {
        return false;
    }
    base.rsplit_once(".so")
        .is_some_and(|(_, suffix)| suffix.is_empty() || suffix.starts_with('.'))
}

/// Updates the container's ldcache with the folders of mounted libraries.
#[derive(Debug)]
pub struct LdconfigHook {
    mounts: DiscoverRef,
    hook_creator: Arc<HookCreator>,
    ldconfig_path: Option<String>,
}

impl LdconfigHook {
    pub fn new(mounts: DiscoverRef, hook_creator: Arc<HookCreator>, ldconfig_path: Option<String>) -> Self {
        Self {
            mounts,
            hook_creator,
            ldconfig_path,
        }
    }
}

impl Discover for LdconfigHook {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        let mut folders: Vec<String> = Vec::new();
        for mount in self.mounts.mounts()? {
            if !is_library_name(&mount.path) {
                continue;
            }
            let Some(dir) = Path::new(&mount.path).parent().and_then(|d| d.to_str()) else {
                continue;
            };
            if !folders.iter().any(|f| f == dir) {
                folders.push(dir.to_string());
            }
        }

        let mut args = Vec::new();
        if let Some(ldconfig) = self.ldconfig_path.as_deref().map(|p| p.trim_start_matches('@')) {
            args.extend(["--ldconfig-path".to_string(), ldconfig.to_string()]);
        }
        for folder in folders {
            args.extend(["--folder".to_string(), folder]);
        }
        Ok(self
            .hook_creator
            .create(HookName::UpdateLdcache, &args)
            .into_iter()
            .collect())
    }
}
