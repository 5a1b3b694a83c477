//! A fake host filesystem for discovery tests.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;

use crate::options::Options;

pub(crate) struct FakeHost {
    _dir: TempDir,
    root: PathBuf,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        Self { _dir: dir, root }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    pub(crate) fn host_path(&self, path: &str) -> String {
        self.path(path).to_string_lossy().into_owned()
    }

    fn parent(&self, path: &str) -> PathBuf {
        let full = self.path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        full
    }

    /// Char devices are faked with links to `/dev/null`.
    pub(crate) fn char_device(&self, path: &str) -> &Self {
        symlink("/dev/null", self.parent(path)).unwrap();
        self
    }

    pub(crate) fn file(&self, path: &str, content: &str) -> &Self {
        fs::write(self.parent(path), content).unwrap();
        self
    }

    pub(crate) fn dir(&self, path: &str) -> &Self {
        fs::create_dir_all(self.path(path)).unwrap();
        self
    }

    pub(crate) fn symlink(&self, target: &str, link: &str) -> &Self {
        symlink(target, self.parent(link)).unwrap();
        self
    }

    /// Options rooted at this host with hooks at their defaults.
    pub(crate) fn options(&self) -> Options {
        Options {
            driver_root: self.root.clone(),
            system_root: self.root.clone(),
            ..Default::default()
        }
    }
}
