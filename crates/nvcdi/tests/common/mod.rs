use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use nvcdi::Mode;
use nvcdi::Options;
use tempfile::TempDir;

/// A host filesystem below a temporary directory. Char devices are links to
/// `/dev/null`.
pub struct TestHost {
    _dir: TempDir,
    root: PathBuf,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn create_parent(&self, path: &str) -> PathBuf {
        let full = self.path(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        full
    }

    pub fn char_device(&self, path: &str) -> &Self {
        symlink("/dev/null", self.create_parent(path)).unwrap();
        self
    }

    pub fn file(&self, path: &str, content: &str) -> &Self {
        fs::write(self.create_parent(path), content).unwrap();
        self
    }

    /// Options for `mode` rooted at this host. NVML is pointed at a missing
    /// library so that tests never touch the real driver.
    pub fn options(&self, mode: Mode) -> Options {
        Options {
            mode,
            driver_root: self.root.clone(),
            system_root: self.root.clone(),
            nvml_lib_path: Some(self.path("/missing/libnvidia-ml.so.1")),
            ..Default::default()
        }
    }
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
