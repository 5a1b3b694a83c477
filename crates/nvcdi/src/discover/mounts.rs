use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use super::Discover;
use super::Mount;
use crate::error::NvcdiResult;
use crate::lookup::relative_to_root;
use crate::lookup::Locate;

pub(crate) const DEFAULT_MOUNT_OPTIONS: &[&str] = &["ro", "nosuid", "nodev", "bind"];

/// Bind mounts for every located match of a list of required patterns.
///
/// Patterns that cannot be located are logged and skipped. Results are
/// cached after the first query and keep the order in which they were found.
#[derive(Debug)]
pub struct Mounts {
    locator: Arc<dyn Locate>,
    root: PathBuf,
    required: Vec<String>,
    options: Vec<String>,
    container_root: Option<PathBuf>,
    cache: OnceLock<Vec<Mount>>,
}

impl Mounts {
    pub fn new<I, S>(locator: Arc<dyn Locate>, root: impl Into<PathBuf>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            locator,
            root: root.into(),
            required: required.into_iter().map(Into::into).collect(),
            options: DEFAULT_MOUNT_OPTIONS.iter().map(|o| o.to_string()).collect(),
            container_root: None,
            cache: OnceLock::new(),
        }
    }

    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    /// Mounts each match at `<container_root>/<pattern>` instead of its
    /// root-relative host path.
    pub fn with_container_root(mut self, container_root: impl Into<PathBuf>) -> Self {
        self.container_root = Some(container_root.into());
        self
    }

    fn discover(&self) -> Vec<Mount> {
        let mut seen = HashSet::new();
        let mut mounts = Vec::new();
        for pattern in &self.required {
            let located = match self.locator.locate(pattern) {
                Ok(located) => located,
                Err(e) => {
                    tracing::warn!("Could not locate {pattern}: {}", e.current_context());
                    continue;
                }
            };
            if located.is_empty() {
                tracing::warn!("Missing {pattern}");
                continue;
            }
            for host_path in located {
                if !seen.insert(host_path.clone()) {
                    continue;
                }
                let path = match &self.container_root {
                    Some(container_root) => crate::lookup::join_root(container_root, pattern),
                    None => relative_to_root(&self.root, &host_path),
                };
                tracing::debug!("Located {pattern} as {}", host_path.display());
                mounts.push(Mount {
                    host_path: host_path.to_string_lossy().into_owned(),
                    path: path.to_string_lossy().into_owned(),
                    options: self.options.clone(),
                });
            }
        }
        mounts
    }
}

impl Discover for Mounts {
    fn mounts(&self) -> NvcdiResult<Vec<Mount>> {
        Ok(self.cache.get_or_init(|| self.discover()).clone())
    }
}
