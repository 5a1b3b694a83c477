use std::path::Path;
use std::sync::Arc;

use super::merge;
use super::CharDevices;
use super::Device;
use super::Discover;
use super::DiscoverRef;
use super::Mount;
use super::Mounts;
use crate::error::NvcdiResult;
use crate::lookup::FileLocator;
use crate::mode::Mode;

/// The dedicated discoverer of a gated mode, or `None` for other modes.
pub fn gated_discoverer(mode: Mode, driver_root: &Path, dev_root: &Path) -> Option<DiscoverRef> {
    let discoverer: DiscoverRef = match mode {
        Mode::Gdrcopy => Arc::new(CharDevices::new(dev_root, ["/dev/gdrdrv"])),
        Mode::Gds => Arc::new(Gds::new(driver_root, dev_root)),
        Mode::Mofed => Arc::new(CharDevices::new(
            driver_root,
            ["/dev/infiniband/uverbs*", "/dev/infiniband/rdma_cm"],
        )),
        Mode::Nvswitch => Arc::new(CharDevices::new(dev_root, ["/dev/nvidia-nvswitch*"])),
        _ => return None,
    };
    Some(discoverer)
}

/// GPUDirect Storage: the nvidia-fs devices and, only when those exist,
/// the udev and cufile configuration mounts.
#[derive(Debug)]
struct Gds {
    devices: CharDevices,
    mounts: DiscoverRef,
}

impl Gds {
    fn new(driver_root: &Path, dev_root: &Path) -> Self {
        let udev = Mounts::new(
            Arc::new(FileLocator::directories(driver_root)),
            driver_root,
            ["/run/udev"],
        );
        let cufile = Mounts::new(
            Arc::new(FileLocator::new(driver_root)),
            driver_root,
            ["/etc/cufile.json"],
        );
        Self {
            devices: CharDevices::new(dev_root, ["/dev/nvidia-fs*"]),
            mounts: merge([Arc::new(udev) as DiscoverRef, Arc::new(cufile)]),
        }
    }
}

impl Discover for Gds {
    fn devices(&self) -> NvcdiResult<Vec<Device>> {
        self.devices.devices()
    }

    fn mounts(&self) -> NvcdiResult<Vec<Mount>> {
        if self.devices.devices()?.is_empty() {
            tracing::debug!("No nvidia-fs devices found, skipping GDS mounts");
            return Ok(Vec::new());
        }
        self.mounts.mounts()
    }
}
