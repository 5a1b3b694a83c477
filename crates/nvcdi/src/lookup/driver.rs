use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;

use super::FileLocator;
use super::LibraryLocator;
use super::Locate;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;

const CONFIG_SEARCH_PATHS: &[&str] = &["/etc", "/usr/local/share", "/usr/share"];

/// The root filesystem holding the NVIDIA driver installation.
#[derive(Debug, Clone)]
pub struct DriverRoot {
    root: PathBuf,
    library_search_paths: Vec<PathBuf>,
}

impl DriverRoot {
    pub fn new(root: impl Into<PathBuf>, library_search_paths: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            library_search_paths,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn library_search_paths(&self) -> &[PathBuf] {
        &self.library_search_paths
    }

    pub fn libraries(&self) -> LibraryLocator {
        LibraryLocator::new(self.root.clone(), &self.library_search_paths)
    }

    /// Locator for driver configuration files in `/etc` and the XDG data dirs.
    pub fn configs(&self) -> FileLocator {
        FileLocator::new(self.root.clone()).with_search_paths(CONFIG_SEARCH_PATHS.iter().copied())
    }

    /// Infers the driver version from the suffix of the installed
    /// `libcuda.so` or `libnvidia-ml.so`.
    pub fn version(&self) -> NvcdiResult<String> {
        let libraries = self.libraries();
        for lib in ["libcuda.so", "libnvidia-ml.so"] {
            let Ok(paths) = libraries.locate(&format!("{lib}.*.*")) else {
                continue;
            };
            let version = paths
                .first()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(&format!("{lib}.")).map(str::to_string));
            if let Some(version) = version.filter(|v| !v.is_empty()) {
                return Ok(version);
            }
        }
        Err(Report::new(NvcdiError::discovery(
            "driver version",
            format!("no versioned driver library found in {}", self.root.display()),
        )))
    }

    /// Host directory containing `libcuda.so.<version>`.
    pub fn library_directory(&self, version: &str) -> NvcdiResult<PathBuf> {
        let located = self.libraries().locate(&format!("libcuda.so.{version}"))?;
        located
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                Report::new(NvcdiError::discovery(
                    "driver libraries",
                    format!("libcuda.so.{version} not found"),
                ))
            })
    }
}
