//! Locating files relative to a (possibly non-`/`) root.

mod driver;
mod executable;
pub mod ldcache;
mod library;
mod symlinks;

use std::collections::HashSet;
use std::fmt::Debug;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;

use crate::error::NvcdiError;
use crate::error::NvcdiResult;

pub use driver::DriverRoot;
pub use executable::executable_locator;
pub use ldcache::LdCacheLocator;
pub use library::LibraryLocator;
pub use symlinks::SymlinkChainLocator;
pub use symlinks::SymlinkLocator;

/// Resolves a pattern to the matching paths on the host.
pub trait Locate: Debug + Send + Sync {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>>;
}

/// Joins `path` below `root`, treating absolute paths as root-relative.
pub fn join_root(root: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}

/// Maps a host path back to the path it has below `root`.
pub fn relative_to_root(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(root) {
        Ok(rel) if root != Path::new("/") => Path::new("/").join(rel),
        _ => path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFilter {
    /// Anything that is not a directory.
    File,
    Directory,
    Executable,
    CharDevice,
}

impl FileFilter {
    fn accepts(self, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path) else {
            return false;
        };
        match self {
            FileFilter::File => !metadata.is_dir(),
            FileFilter::Directory => metadata.is_dir(),
            FileFilter::Executable => {
                !metadata.is_dir() && metadata.permissions().mode() & 0o111 != 0
            }
            FileFilter::CharDevice => metadata.file_type().is_char_device(),
        }
    }
}

/// Globs for a pattern below each search path of a root.
#[derive(Debug, Clone)]
pub struct FileLocator {
    root: PathBuf,
    search_paths: Vec<PathBuf>,
    filter: FileFilter,
    count: Option<usize>,
    optional: bool,
}

impl FileLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            search_paths: Vec::new(),
            filter: FileFilter::File,
            count: None,
            optional: false,
        }
    }

    pub fn directories(root: impl Into<PathBuf>) -> Self {
        Self::new(root).with_filter(FileFilter::Directory)
    }

    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// An optional locator returns an empty list instead of failing.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn prefixes(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            return vec![self.root.clone()];
        }
        let mut seen = HashSet::new();
        self.search_paths
            .iter()
            .filter(|p| seen.insert(p.as_path()))
            .map(|p| join_root(&self.root, p))
            .collect()
    }
}

impl Locate for FileLocator {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>> {
        let mut found = Vec::new();
        'prefixes: for prefix in self.prefixes() {
            let full = join_root(&prefix, pattern);
            let Some(full) = full.to_str() else {
                continue;
            };
            let matches = glob::glob(full).map_err(|e| {
                Report::new(NvcdiError::Lookup {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
            })?;
            for candidate in matches.flatten() {
                if !self.filter.accepts(&candidate) {
                    tracing::debug!("Ignoring {}: does not match filter", candidate.display());
                    continue;
                }
                found.push(candidate);
                if self.count.is_some_and(|c| found.len() >= c) {
                    break 'prefixes;
                }
            }
        }
        if found.is_empty() && !self.optional {
            return Err(Report::new(NvcdiError::Lookup {
                pattern: pattern.to_string(),
                message: format!("pattern {pattern} not found"),
            }));
        }
        Ok(found)
    }
}

/// Tries each locator in turn and returns the first non-empty result.
#[derive(Debug)]
pub struct First(pub Vec<Box<dyn Locate>>);

impl Locate for First {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>> {
        for locator in &self.0 {
            match locator.locate(pattern) {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => {}
                Err(e) => tracing::debug!("Locator failed for {pattern}: {e:?}"),
            }
        }
        Err(Report::new(NvcdiError::Lookup {
            pattern: pattern.to_string(),
            message: format!("pattern {pattern} not found"),
        }))
    }
}
