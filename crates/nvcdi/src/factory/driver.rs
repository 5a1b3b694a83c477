use std::ffi::CStr;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;

use super::Context;
use crate::discover::ipc_discoverer;
use crate::discover::merge;
use crate::discover::DiscoverRef;
use crate::discover::LdconfigHook;
use crate::discover::Mounts;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::lookup::executable_locator;
use crate::lookup::join_root;
use crate::lookup::FileLocator;

const FIRMWARE_CLASS_PATH: &str = "/sys/module/firmware_class/parameters/path";

const DRIVER_BINARIES: &[&str] = &[
    "nvidia-smi",
    "nvidia-debugdump",
    "nvidia-persistenced",
    "nvidia-cuda-mps-control",
    "nvidia-cuda-mps-server",
];

/// Libraries, IPC sockets, GSP firmware and binaries of a driver version.
pub(crate) fn driver_discoverer(ctx: &Context, version: &str) -> NvcdiResult<DiscoverRef> {
    let libraries = driver_libraries(ctx, version)
        .attach_printable("failed to create discoverer for driver libraries")?;
    let firmware = firmware(ctx, version)?;
    let binaries = Mounts::new(
        Arc::new(executable_locator(ctx.driver_root())),
        ctx.driver_root(),
        DRIVER_BINARIES.iter().copied(),
    );

    Ok(merge([
        libraries,
        ipc_discoverer(ctx.driver_root()),
        firmware,
        Arc::new(binaries),
    ]))
}

/// Every `*.so.<version>` next to `libcuda.so.<version>`, plus the ldcache
/// update for their folders.
fn driver_libraries(ctx: &Context, version: &str) -> NvcdiResult<DiscoverRef> {
    let lib_dir = ctx.driver.library_directory(version)?;
    let libraries: DiscoverRef = Arc::new(Mounts::new(
        Arc::new(FileLocator::new("/").with_search_paths([lib_dir])),
        ctx.driver_root(),
        [format!("*.so.{version}")],
    ));
    let ldcache = LdconfigHook::new(libraries.clone(), ctx.hook_creator.clone(), ctx.ldconfig_path.clone());
    Ok(merge([libraries, Arc::new(ldcache) as DiscoverRef]))
}

fn firmware(ctx: &Context, version: &str) -> NvcdiResult<DiscoverRef> {
    let search_paths = firmware_search_paths(&ctx.system_root)?;
    let locator = FileLocator::new(ctx.driver_root()).with_search_paths(search_paths);
    Ok(Arc::new(Mounts::new(
        Arc::new(locator),
        ctx.driver_root(),
        [format!("nvidia/{version}/gsp*.bin")],
    )))
}

/// The kernel's firmware search order, custom path first.
fn firmware_search_paths(system_root: &Path) -> NvcdiResult<Vec<String>> {
    let mut paths = Vec::new();
    match fs::read_to_string(join_root(system_root, FIRMWARE_CLASS_PATH)) {
        Ok(custom) if !custom.trim().is_empty() => {
            tracing::debug!("Using custom firmware class path: {}", custom.trim());
            paths.push(custom.trim().to_string());
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to get custom firmware class path: {e}"),
    }

    let release = kernel_release()?;
    paths.extend([
        format!("/lib/firmware/updates/{release}"),
        "/lib/firmware/updates/".to_string(),
        format!("/lib/firmware/{release}"),
        "/lib/firmware/".to_string(),
    ]);
    Ok(paths)
}

fn kernel_release() -> NvcdiResult<String> {
    // SAFETY: utsname is plain old data and uname only writes into it.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return Err(Report::new(NvcdiError::io(format!(
            "failed to get UTS_RELEASE: {}",
            std::io::Error::last_os_error()
        ))));
    }
    // SAFETY: uname NUL-terminates the release field.
    let release = unsafe { CStr::from_ptr(uts.release.as_ptr()) };
    Ok(release.to_string_lossy().into_owned())
}
