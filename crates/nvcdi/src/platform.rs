use std::fs;
use std::path::PathBuf;

use crate::lookup::join_root;
use crate::nvml::NvmlProvider;

/// Platform checks used to resolve `auto` mode.
pub trait PlatformInfo {
    fn has_nvml(&self) -> bool;
    fn is_tegra(&self) -> bool;
    fn has_dxcore(&self) -> bool;
}

/// Inspects the host below `root`.
pub struct HostPlatform<'a> {
    root: PathBuf,
    nvml: &'a dyn NvmlProvider,
}

impl<'a> HostPlatform<'a> {
    pub fn new(root: impl Into<PathBuf>, nvml: &'a dyn NvmlProvider) -> Self {
        Self {
            root: root.into(),
            nvml,
        }
    }
}

impl PlatformInfo for HostPlatform<'_> {
    fn has_nvml(&self) -> bool {
        match self.nvml.open() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("NVML is not available: {e}");
                false
            }
        }
    }

    fn is_tegra(&self) -> bool {
        if join_root(&self.root, "/etc/nv_tegra_release").exists() {
            return true;
        }
        fs::read_to_string(join_root(&self.root, "/sys/devices/soc0/family"))
            .is_ok_and(|family| family.trim().to_lowercase().starts_with("tegra"))
    }

    fn has_dxcore(&self) -> bool {
        join_root(&self.root, "/dev/dxg").exists()
            || join_root(&self.root, "/usr/lib/wsl/lib/libdxcore.so").exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nvml::mock::MockNvml;

    #[test]
    fn detects_tegra_and_wsl_markers() {
        let root = tempfile::tempdir().unwrap();
        let nvml = MockNvml::unavailable();
        let platform = HostPlatform::new(root.path(), &nvml);
        assert!(!platform.has_nvml());
        assert!(!platform.is_tegra());
        assert!(!platform.has_dxcore());

        fs::create_dir_all(root.path().join("sys/devices/soc0")).unwrap();
        fs::write(root.path().join("sys/devices/soc0/family"), "Tegra\n").unwrap();
        fs::create_dir_all(root.path().join("usr/lib/wsl/lib")).unwrap();
        fs::write(root.path().join("usr/lib/wsl/lib/libdxcore.so"), "").unwrap();
        assert!(platform.is_tegra());
        assert!(platform.has_dxcore());
    }

    #[test]
    fn nvml_presence_follows_provider() {
        let root = tempfile::tempdir().unwrap();
        let nvml = MockNvml::with_gpus(vec![]);
        assert!(HostPlatform::new(root.path(), &nvml).has_nvml());
    }
}
