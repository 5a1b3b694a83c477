//! Tegra-based systems, whose driver files are listed in CSV mount specs.

mod filter;
mod mount_specs;

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use crate::discover::merge;
use crate::discover::CharDevices;
use crate::discover::Discover;
use crate::discover::DiscoverRef;
use crate::discover::Hook;
use crate::discover::HookCreator;
use crate::discover::HookName;
use crate::discover::Mount;
use crate::discover::Mounts;
use crate::error::NvcdiResult;
use crate::factory::Context;
use crate::lookup::relative_to_root;
use crate::lookup::FileLocator;
use crate::lookup::Locate;
use crate::lookup::SymlinkChainLocator;
use crate::lookup::SymlinkLocator;

pub use mount_specs::default_csv_files;
pub use mount_specs::MountSpecType;
pub use mount_specs::MountSpecs;

/// Device nodes, directories, libraries and symlinks of a set of mount
/// specs, followed by the hook that recreates their symlinks.
pub(crate) fn tegra_discoverer(ctx: &Context, specs: &MountSpecs) -> DiscoverRef {
    let driver_root = ctx.driver_root().to_path_buf();

    let mut search_paths: Vec<PathBuf> = ctx.driver.library_search_paths().to_vec();
    search_paths.push(PathBuf::from("/"));
    let symlink_locator: Arc<dyn Locate> = Arc::new(SymlinkLocator::new(
        FileLocator::new(driver_root.clone()).with_search_paths(search_paths),
    ));

    let devices = Arc::new(CharDevices::new(
        ctx.dev_root.clone(),
        specs.paths(MountSpecType::Dev).to_vec(),
    ));
    let directories = Arc::new(Mounts::new(
        Arc::new(FileLocator::directories(driver_root.clone())),
        driver_root.clone(),
        specs.paths(MountSpecType::Dir).to_vec(),
    ));
    let libraries: DiscoverRef = Arc::new(Mounts::new(
        symlink_locator.clone(),
        driver_root.clone(),
        specs.paths(MountSpecType::Lib).to_vec(),
    ));
    let symlinks = Arc::new(Mounts::new(
        symlink_locator,
        driver_root.clone(),
        specs.paths(MountSpecType::Sym).to_vec(),
    ));
    let symlink_hook = Arc::new(CsvSymlinksHook {
        driver_root: driver_root.clone(),
        targets: specs.paths(MountSpecType::Sym).to_vec(),
        libraries: libraries.clone(),
        chain_locator: SymlinkChainLocator::new(FileLocator::new(driver_root).optional()),
        hook_creator: ctx.hook_creator.clone(),
    });

    merge([
        devices as DiscoverRef,
        directories,
        libraries,
        symlinks,
        symlink_hook,
    ])
}

/// Recreates the symlinks listed in the CSV files along with a few links
/// that applications expect but the driver does not ship.
#[derive(Debug)]
struct CsvSymlinksHook {
    driver_root: PathBuf,
    targets: Vec<String>,
    libraries: DiscoverRef,
    chain_locator: SymlinkChainLocator,
    hook_creator: Arc<HookCreator>,
}

impl CsvSymlinksHook {
    fn chain_links(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for target in &self.targets {
            let chain = match self.chain_locator.locate(target) {
                Ok(chain) => chain,
                Err(_) => {
                    tracing::warn!("Failed to locate symlink {target}");
                    continue;
                }
            };
            for candidate in chain {
                let Ok(link_target) = fs::read_link(&candidate) else {
                    tracing::debug!("{} is not a symlink", candidate.display());
                    continue;
                };
                let link = format!(
                    "{}::{}",
                    link_target.display(),
                    relative_to_root(&self.driver_root, &candidate).display()
                );
                if seen.insert(link.clone()) {
                    links.push(link);
                } else {
                    tracing::debug!("Skipping duplicate link {link}");
                }
            }
        }
        links
    }
}

/// Links for library names that are commonly assumed to exist.
fn specific_links(mounts: &[Mount]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for mount in mounts {
        let path = Path::new(&mount.path);
        let Some(lib) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let (target, link) = if lib.starts_with("libcuda.so") {
            ("libcuda.so.1", "libcuda.so")
        } else if lib.starts_with("libGLX_nvidia.so") {
            (lib, "libGLX_indirect.so.0")
        } else if lib.starts_with("libnvidia-opticalflow.so") {
            ("libnvidia-opticalflow.so.1", "libnvidia-opticalflow.so")
        } else {
            continue;
        };
        if !seen.insert(link) {
            continue;
        }
        let dir = path.parent().unwrap_or(Path::new("/"));
        links.push(format!("{target}::{}", dir.join(link).display()));
    }
    links
}

impl Discover for CsvSymlinksHook {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        let mut links = self.chain_links();
        links.extend(specific_links(&self.libraries.mounts()?));
        Ok(self
            .hook_creator
            .create(HookName::CreateSymlinks, &links)
            .into_iter()
            .collect())
    }
}
