use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use super::Discover;
use super::DiscoverRef;
use super::Hook;
use super::HookCreator;
use super::HookName;
use crate::error::NvcdiResult;
use crate::lookup::join_root;

/// DRM device nodes (`/dev/dri/card*`, `/dev/dri/renderD*`) of a PCI device.
pub fn drm_device_nodes(sys_root: &Path, pci_bus_id: &str) -> Vec<String> {
    let drm = join_root(sys_root, format!("/sys/bus/pci/devices/{pci_bus_id}/drm"));
    let Ok(entries) = fs::read_dir(&drm) else {
        tracing::debug!("No DRM devices for {pci_bus_id}");
        return Vec::new();
    };
    let mut nodes: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with("card") || name.starts_with("renderD"))
        .map(|name| format!("/dev/dri/{name}"))
        .collect();
    nodes.sort();
    nodes
}

/// Recreates the `/dev/dri/by-path` links for the selected DRM nodes of a GPU.
#[derive(Debug)]
pub struct ByPathHooks {
    dev_root: PathBuf,
    pci_bus_id: String,
    devices: DiscoverRef,
    hook_creator: Arc<HookCreator>,
}

impl ByPathHooks {
    pub fn new(
        dev_root: impl Into<PathBuf>,
        pci_bus_id: impl Into<String>,
        devices: DiscoverRef,
        hook_creator: Arc<HookCreator>,
    ) -> Self {
        Self {
            dev_root: dev_root.into(),
            pci_bus_id: pci_bus_id.into(),
            devices,
            hook_creator,
        }
    }

    fn links(&self, selected: &HashSet<PathBuf>) -> Vec<String> {
        let candidates = [
            format!("/dev/dri/by-path/pci-{}-card", self.pci_bus_id),
            format!("/dev/dri/by-path/pci-{}-render", self.pci_bus_id),
        ];
        let mut links = Vec::new();
        for candidate in candidates {
            let link_path = join_root(&self.dev_root, &candidate);
            let target = match fs::read_link(&link_path) {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!("Failed to evaluate symlink {}: {e}", link_path.display());
                    continue;
                }
            };
            let device_node = match link_path.parent() {
                Some(dir) if target.is_relative() => normalize(&dir.join(&target)),
                _ => target.clone(),
            };
            if !selected.contains(&device_node) {
                tracing::debug!("Ignoring by-path link for unselected device {}", device_node.display());
                continue;
            }
            links.push(format!("{}::{candidate}", target.display()));
        }
        links
    }
}

/// Lexically resolves `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            std::path::Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized
}

impl Discover for ByPathHooks {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        let devices = self.devices.devices()?;
        if devices.is_empty() {
            return Ok(Vec::new());
        }
        let selected = devices.iter().map(|d| PathBuf::from(&d.host_path)).collect();
        let links = self.links(&selected);
        Ok(self
            .hook_creator
            .create(HookName::CreateSymlinks, &links)
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::discover::CharDevices;

    #[test]
    fn drm_nodes_from_sysfs() {
        let root = tempfile::tempdir().unwrap();
        let drm = root.path().join("sys/bus/pci/devices/0000:3b:00.0/drm");
        for entry in ["card1", "renderD128", "controlD64"] {
            fs::create_dir_all(drm.join(entry)).unwrap();
        }
        assert_eq!(
            drm_device_nodes(root.path(), "0000:3b:00.0"),
            vec!["/dev/dri/card1", "/dev/dri/renderD128"]
        );
        assert!(drm_device_nodes(root.path(), "0000:af:00.0").is_empty());
    }

    #[test]
    fn links_only_for_selected_devices() {
        let root = tempfile::tempdir().unwrap();
        let dri = root.path().join("dev/dri");
        fs::create_dir_all(dri.join("by-path")).unwrap();
        symlink("/dev/null", dri.join("card1")).unwrap();
        symlink("/dev/null", dri.join("renderD128")).unwrap();
        symlink("../card1", dri.join("by-path/pci-0000:3b:00.0-card")).unwrap();
        symlink("../renderD129", dri.join("by-path/pci-0000:3b:00.0-render")).unwrap();

        let devices: DiscoverRef = Arc::new(CharDevices::new(
            root.path(),
            ["/dev/dri/card1", "/dev/dri/renderD128"],
        ));
        let creator = Arc::new(HookCreator::new("/usr/bin/nvidia-cdi-hook", &[], &[]));
        let hooks = ByPathHooks::new(root.path(), "0000:3b:00.0", devices, creator)
            .hooks()
            .unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(
            hooks[0].args[1..].to_vec(),
            vec![
                "create-symlinks".to_string(),
                "--link".to_string(),
                "../card1::/dev/dri/by-path/pci-0000:3b:00.0-card".to_string()
            ]
        );
    }
}
