use std::path::PathBuf;

use super::First;
use super::FileLocator;
use super::LdCacheLocator;
use super::Locate;
use super::SymlinkLocator;
use crate::error::NvcdiResult;

const DEFAULT_LIBRARY_PATHS: &[&str] = &[
    "/",
    "/usr/lib64",
    "/usr/lib/x86_64-linux-gnu",
    "/usr/lib/aarch64-linux-gnu",
    "/usr/lib/x86_64-linux-gnu/nvidia/current",
    "/usr/lib/aarch64-linux-gnu/nvidia/current",
    "/lib64",
    "/lib/x86_64-linux-gnu",
    "/lib/aarch64-linux-gnu",
    "/lib/x86_64-linux-gnu/nvidia/current",
    "/lib/aarch64-linux-gnu/nvidia/current",
];

/// Locates shared libraries and resolves them to their targets.
///
/// Explicit search paths are host paths and are used exclusively. Without
/// them the well-known library directories below the root are tried before
/// falling back to the root's `ld.so.cache`.
#[derive(Debug)]
pub struct LibraryLocator {
    inner: Box<dyn Locate>,
}

impl LibraryLocator {
    pub fn new(root: impl Into<PathBuf>, search_paths: &[PathBuf]) -> Self {
        if !search_paths.is_empty() {
            let file = FileLocator::new("/").with_search_paths(search_paths.iter().cloned());
            return Self {
                inner: Box::new(SymlinkLocator::new(file)),
            };
        }

        let root = root.into();
        let file = FileLocator::new(root.clone()).with_search_paths(DEFAULT_LIBRARY_PATHS.iter().copied());
        Self {
            inner: Box::new(First(vec![
                Box::new(SymlinkLocator::new(file)),
                Box::new(LdCacheLocator::new(root)),
            ])),
        }
    }
}

impl Locate for LibraryLocator {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>> {
        self.inner.locate(pattern)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn finds_libraries_in_default_paths() {
        let root = tempfile::tempdir().unwrap();
        let lib = root.path().join("usr/lib/x86_64-linux-gnu");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("libcuda.so.550.54.14"), "").unwrap();

        let locator = LibraryLocator::new(root.path(), &[]);
        assert_eq!(
            locator.locate("libcuda.so.550.54.14").unwrap(),
            vec![fs::canonicalize(lib.join("libcuda.so.550.54.14")).unwrap()]
        );
    }

    #[test]
    fn explicit_search_paths_are_host_paths() {
        let host = tempfile::tempdir().unwrap();
        fs::write(host.path().join("libnvidia-ml.so.1"), "").unwrap();

        let locator = LibraryLocator::new("/nonexistent", &[host.path().to_path_buf()]);
        assert_eq!(
            locator.locate("libnvidia-ml.so.1").unwrap(),
            vec![fs::canonicalize(host.path().join("libnvidia-ml.so.1")).unwrap()]
        );
    }

    #[test]
    fn missing_library_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(LibraryLocator::new(root.path(), &[]).locate("libcuda.so.1").is_err());
    }
}
