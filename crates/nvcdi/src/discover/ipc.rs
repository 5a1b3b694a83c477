use std::path::Path;
use std::sync::Arc;

use super::merge;
use super::DiscoverRef;
use super::Mounts;
use crate::lookup::FileLocator;

const IPC_MOUNT_OPTIONS: &[&str] = &["ro", "nosuid", "nodev", "rbind", "rprivate", "noexec"];

/// Persistenced and fabric manager sockets plus the MPS pipe directory.
pub fn ipc_discoverer(driver_root: &Path) -> DiscoverRef {
    let sockets = FileLocator::new(driver_root)
        .with_search_paths(["/run", "/var/run"])
        .with_count(1);
    let sockets = Mounts::new(
        Arc::new(sockets),
        driver_root,
        ["/nvidia-persistenced/socket", "/nvidia-fabricmanager/socket"],
    )
    .with_options(IPC_MOUNT_OPTIONS);

    let mps = Mounts::new(
        Arc::new(FileLocator::directories(driver_root)),
        driver_root,
        ["/tmp/nvidia-mps"],
    )
    .with_options(IPC_MOUNT_OPTIONS);

    merge([Arc::new(sockets) as DiscoverRef, Arc::new(mps)])
}

#[cfg(test)]
mod tests {
    use std::fs;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn ipc_mounts() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("var/run/nvidia-persistenced")).unwrap();
        fs::write(root.path().join("var/run/nvidia-persistenced/socket"), "").unwrap();
        fs::create_dir_all(root.path().join("tmp/nvidia-mps")).unwrap();

        let mounts = ipc_discoverer(root.path()).mounts().unwrap();
        let paths: Vec<_> = mounts.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/var/run/nvidia-persistenced/socket", "/tmp/nvidia-mps"]
        );
        assert!(mounts[0].options.contains(&"noexec".to_string()));
    }
}
