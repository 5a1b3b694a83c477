use std::path::Path;
use std::sync::Arc;

use super::Discover;
use super::DiscoverRef;
use super::Hook;
use super::HookCreator;
use super::HookName;
use crate::error::NvcdiResult;

const NESTED_DEVICE_FOLDERS: &[&str] = &["/dev/dri", "/dev/nvidia-caps"];

/// Emits a `chmod` hook making the parent folders of nested device nodes
/// accessible in the container.
#[derive(Debug)]
pub struct DeviceFolderPermissions {
    devices: DiscoverRef,
    hook_creator: Arc<HookCreator>,
}

impl DeviceFolderPermissions {
    pub fn new(devices: DiscoverRef, hook_creator: Arc<HookCreator>) -> Self {
        Self {
            devices,
            hook_creator,
        }
    }

    fn folders(&self) -> NvcdiResult<Vec<String>> {
        let mut folders: Vec<String> = Vec::new();
        for device in self.devices.devices()? {
            let Some(parent) = Path::new(&device.path).parent().and_then(|p| p.to_str()) else {
                continue;
            };
            if !NESTED_DEVICE_FOLDERS.contains(&parent) || folders.iter().any(|f| f == parent) {
                continue;
            }
            folders.push(parent.to_string());
            if folders.len() == NESTED_DEVICE_FOLDERS.len() {
                break;
            }
        }
        Ok(folders)
    }
}

impl Discover for DeviceFolderPermissions {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        let folders = self.folders()?;
        Ok(self
            .hook_creator
            .create(HookName::Chmod, &folders)
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::discover::Device;

    #[derive(Debug)]
    struct StaticDevices(Vec<&'static str>);

    impl Discover for StaticDevices {
        fn devices(&self) -> NvcdiResult<Vec<Device>> {
            Ok(self
                .0
                .iter()
                .map(|p| Device {
                    host_path: p.to_string(),
                    path: p.to_string(),
                })
                .collect())
        }
    }

    #[test]
    fn chmod_for_nested_device_folders() {
        let devices = Arc::new(StaticDevices(vec![
            "/dev/nvidia0",
            "/dev/dri/card1",
            "/dev/dri/renderD128",
            "/dev/nvidia-caps/nvidia-cap1",
        ]));
        let creator = Arc::new(HookCreator::new("/usr/bin/nvidia-cdi-hook", &[HookName::Chmod], &[]));
        let hooks = DeviceFolderPermissions::new(devices, creator).hooks().unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(
            hooks[0].args,
            vec![
                "nvidia-cdi-hook",
                "chmod",
                "--mode",
                "755",
                "--path",
                "/dev/dri",
                "--path",
                "/dev/nvidia-caps"
            ]
        );
    }

    #[test]
    fn no_hook_without_nested_devices() {
        let devices = Arc::new(StaticDevices(vec!["/dev/nvidia0"]));
        let creator = Arc::new(HookCreator::new("/usr/bin/nvidia-cdi-hook", &[HookName::Chmod], &[]));
        assert!(DeviceFolderPermissions::new(devices, creator).hooks().unwrap().is_empty());
    }
}
