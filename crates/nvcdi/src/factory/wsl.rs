use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;

use super::Context;
use crate::discover::merge;
use crate::discover::CharDevices;
use crate::discover::CreateSymlinksHook;
use crate::discover::DiscoverRef;
use crate::discover::LdconfigHook;
use crate::discover::Mount;
use crate::discover::Mounts;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::generator::DeviceSpecGenerator;
use crate::generator::GeneratorArena;
use crate::lookup::join_root;
use crate::lookup::relative_to_root;
use crate::lookup::FileLocator;

const DRIVER_STORE_PATTERN: &str = "/usr/lib/wsl/drivers/*/libcuda.so.1.1";
const WSL_LIB_DIR: &str = "/usr/lib/wsl/lib";

const DRIVER_STORE_FILES: &[&str] = &[
    "libcuda.so.1.1",
    "libcuda_loader.so",
    "libnvidia-ptxjitcompiler.so.1",
    "libnvidia-ml.so.1",
    "libnvidia-ml_loader.so",
    "libdxcore.so",
    "libnvdxgdmal.so.1",
    "nvcubins.bin",
    "nvidia-smi",
];

/// Windows Subsystem for Linux: a single `all` device backed by `/dev/dxg`
/// and the libraries of the Windows driver store.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WslFactory;

impl WslFactory {
    pub fn generators(&self, ctx: &Context) -> GeneratorArena {
        GeneratorArena::with_generator(DeviceSpecGenerator::All {
            devices: Arc::new(CharDevices::new(&ctx.dev_root, ["/dev/dxg"])),
        })
    }

    pub fn common_edits(&self, ctx: &Context) -> NvcdiResult<DiscoverRef> {
        let mut search_paths = driver_store_paths(ctx)?;
        search_paths.push(PathBuf::from(WSL_LIB_DIR));

        let store: DiscoverRef = Arc::new(Mounts::new(
            Arc::new(
                FileLocator::new(ctx.driver_root())
                    .with_search_paths(search_paths)
                    .with_count(1),
            ),
            ctx.driver_root(),
            DRIVER_STORE_FILES.iter().copied(),
        ));
        let smi = CreateSymlinksHook::new(store.clone(), ctx.hook_creator.clone(), nvidia_smi_link);
        let ldcache = LdconfigHook::new(store.clone(), ctx.hook_creator.clone(), ctx.ldconfig_path.clone());

        Ok(merge([store, Arc::new(smi) as DiscoverRef, Arc::new(ldcache)]))
    }
}

/// Driver store folders holding `libcuda.so.1.1`, relative to the driver root.
fn driver_store_paths(ctx: &Context) -> NvcdiResult<Vec<PathBuf>> {
    let pattern = join_root(ctx.driver_root(), DRIVER_STORE_PATTERN);
    let mut paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| {
            Report::new(NvcdiError::Lookup {
                pattern: DRIVER_STORE_PATTERN.to_string(),
                message: e.to_string(),
            })
        })?
        .flatten()
        .filter_map(|lib| lib.parent().map(|dir| relative_to_root(ctx.driver_root(), dir)))
        .collect();
    paths.dedup();

    if paths.is_empty() {
        return Err(Report::new(NvcdiError::discovery("driver store", "no driver store paths found")));
    }
    if paths.len() > 1 {
        tracing::warn!("Found multiple driver store paths: {paths:?}");
    }
    tracing::info!("Using WSL driver store paths: {paths:?}");
    Ok(paths)
}

fn nvidia_smi_link(mounts: &[Mount]) -> Vec<String> {
    match mounts.iter().find(|m| m.path.ends_with("/nvidia-smi")) {
        Some(smi) => vec![format!("{}::/usr/bin/nvidia-smi", smi.path)],
        None => {
            tracing::warn!("Failed to find nvidia-smi in mounts");
            Vec::new()
        }
    }
}
