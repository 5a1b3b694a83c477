use std::env;
use std::path::PathBuf;

use super::FileFilter;
use super::FileLocator;

const DEFAULT_PATHS: &[&str] = &[
    "/usr/local/sbin",
    "/usr/local/bin",
    "/usr/sbin",
    "/usr/bin",
    "/sbin",
    "/bin",
];

/// Locates the first executable with a given name along `PATH` and the
/// standard binary directories, below `root`.
pub fn executable_locator(root: impl Into<PathBuf>) -> FileLocator {
    let mut paths: Vec<PathBuf> = env::var_os("PATH")
        .map(|p| env::split_paths(&p).collect())
        .unwrap_or_default();
    for default in DEFAULT_PATHS {
        let default = PathBuf::from(default);
        if !paths.contains(&default) {
            paths.push(default);
        }
    }
    FileLocator::new(root)
        .with_search_paths(paths)
        .with_filter(FileFilter::Executable)
        .with_count(1)
}
