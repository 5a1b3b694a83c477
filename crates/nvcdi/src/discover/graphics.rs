use std::path::Path;
use std::sync::Arc;

use super::merge;
use super::CreateSymlinksHook;
use super::Discover;
use super::DiscoverRef;
use super::HookCreator;
use super::Mount;
use super::Mounts;
use crate::error::NvcdiResult;
use crate::lookup::DriverRoot;
use crate::lookup::FileLocator;

const GRAPHICS_CONFIGS: &[&str] = &[
    "glvnd/egl_vendor.d/10_nvidia.json",
    "egl/egl_external_platform.d/15_nvidia_gbm.json",
    "egl/egl_external_platform.d/10_nvidia_wayland.json",
    "nvidia/nvoptix.bin",
    "X11/xorg.conf.d/10-nvidia.conf",
    "X11/xorg.conf.d/nvidia-drm-outputclass.conf",
];

const VULKAN_CONFIGS: &[&str] = &[
    "vulkan/icd.d/nvidia_icd.json",
    "vulkan/icd.d/nvidia_layers.json",
    "vulkan/implicit_layer.d/nvidia_layers.json",
];

const XORG_SUBDIRS: &[&str] = &[
    "nvidia/xorg",
    "xorg/modules/drivers",
    "xorg/modules/extensions",
    "xorg/modules/updates/drivers",
    "xorg/modules/updates/extensions",
];

const ALLOCATOR: &str = "libnvidia-allocator.so";
const VULKAN_PRODUCER: &str = "libnvidia-vulkan-producer.so";
const GLX_SERVER: &str = "libglxserver_nvidia.so";

/// EGL, Vulkan and Xorg files used by graphics workloads.
///
/// Fails when the driver library directory cannot be determined; callers
/// treat graphics support as optional.
pub fn graphics_discoverer(
    driver: &DriverRoot,
    version: &str,
    hook_creator: Arc<HookCreator>,
) -> NvcdiResult<DiscoverRef> {
    let root = driver.root();
    let configs = Mounts::new(Arc::new(driver.configs()), root, GRAPHICS_CONFIGS.iter().copied());
    let vulkan = Mounts::new(Arc::new(driver.configs()), root, VULKAN_CONFIGS.iter().copied())
        .with_container_root("/etc");

    let lib_dir = driver.library_directory(version)?;
    let libraries: DiscoverRef = Arc::new(Mounts::new(
        Arc::new(FileLocator::new("/").with_search_paths([lib_dir.clone()])),
        root,
        [
            "libnvidia-egl-gbm.so.*".to_string(),
            "libnvidia-egl-wayland.so.*".to_string(),
            format!("{ALLOCATOR}.{version}"),
            format!("{VULKAN_PRODUCER}.{version}"),
        ],
    ));
    let xorg: DiscoverRef = Arc::new(Mounts::new(
        Arc::new(
            FileLocator::new("/")
                .with_search_paths(XORG_SUBDIRS.iter().map(|d| lib_dir.join(d)))
                .with_count(1),
        ),
        root,
        ["nvidia_drv.so".to_string(), format!("{GLX_SERVER}.{version}")],
    ));

    let links = CreateSymlinksHook::new(
        merge([libraries.clone(), xorg.clone()]),
        hook_creator,
        graphics_links,
    );

    Ok(merge([
        Arc::new(configs) as DiscoverRef,
        Arc::new(vulkan),
        Arc::new(WithoutAllocator(libraries)),
        xorg,
        Arc::new(links),
    ]))
}

fn graphics_links(mounts: &[Mount]) -> Vec<String> {
    let mut links = Vec::new();
    for mount in mounts {
        let path = Path::new(&mount.path);
        let (Some(dir), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str())) else {
            continue;
        };
        if name.starts_with(ALLOCATOR) {
            links.push(format!(
                "../{ALLOCATOR}.1::{}",
                dir.join("gbm/nvidia-drm_gbm.so").display()
            ));
        } else if name.starts_with(VULKAN_PRODUCER) {
            links.push(format!("{name}::{}", dir.join(VULKAN_PRODUCER).display()));
        } else if name.starts_with(GLX_SERVER) {
            links.push(format!("{name}::{}", dir.join(GLX_SERVER).display()));
        }
    }
    links
}

/// Drops `libnvidia-allocator.so` from the mounts; the container runtime
/// already injects it with the other versioned driver libraries.
#[derive(Debug)]
struct WithoutAllocator(DiscoverRef);

impl Discover for WithoutAllocator {
    fn mounts(&self) -> NvcdiResult<Vec<Mount>> {
        Ok(self
            .0
            .mounts()?
            .into_iter()
            .filter(|m| {
                Path::new(&m.path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(true, |n| !n.starts_with(ALLOCATOR))
            })
            .collect())
    }
}
