use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use super::join_root;
use super::FileLocator;
use super::Locate;
use crate::error::NvcdiResult;

/// Locates files and returns their fully resolved targets.
#[derive(Debug, Clone)]
pub struct SymlinkLocator {
    file: FileLocator,
}

impl SymlinkLocator {
    pub fn new(file: FileLocator) -> Self {
        Self { file }
    }
}

impl Locate for SymlinkLocator {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>> {
        let candidates = self.file.locate(pattern)?;
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let target = match fs::canonicalize(&candidate) {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!("Failed to resolve {}: {e}", candidate.display());
                    continue;
                }
            };
            if seen.insert(target.clone()) {
                targets.push(target);
            }
        }
        Ok(targets)
    }
}

/// Locates files and returns every path along their symlink chains.
#[derive(Debug, Clone)]
pub struct SymlinkChainLocator {
    file: FileLocator,
}

impl SymlinkChainLocator {
    pub fn new(file: FileLocator) -> Self {
        Self { file }
    }
}

impl Locate for SymlinkChainLocator {
    fn locate(&self, pattern: &str) -> NvcdiResult<Vec<PathBuf>> {
        let root = self.file.root().to_path_buf();
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        for candidate in self.file.locate(pattern)? {
            let mut current = candidate;
            while seen.insert(current.clone()) {
                chain.push(current.clone());
                let Ok(target) = fs::read_link(&current) else {
                    break;
                };
                current = if target.is_absolute() {
                    join_root(&root, &target)
                } else {
                    match current.parent() {
                        Some(dir) => dir.join(&target),
                        None => target,
                    }
                };
            }
        }
        Ok(chain)
    }
}
