use std::path::PathBuf;
use std::sync::Arc;

use super::Device;
use super::Discover;
use super::Mounts;
use crate::error::NvcdiResult;
use crate::lookup::FileFilter;
use crate::lookup::FileLocator;

/// Character device nodes below a device root.
#[derive(Debug)]
pub struct CharDevices {
    mounts: Mounts,
}

impl CharDevices {
    pub fn new<I, S>(dev_root: impl Into<PathBuf>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dev_root = dev_root.into();
        let locator = FileLocator::new(dev_root.clone())
            .with_search_paths(["/", "/dev"])
            .with_filter(FileFilter::CharDevice);
        Self {
            mounts: Mounts::new(Arc::new(locator), dev_root, patterns),
        }
    }
}

impl Discover for CharDevices {
    fn devices(&self) -> NvcdiResult<Vec<Device>> {
        Ok(self
            .mounts
            .mounts()?
            .into_iter()
            .map(|m| Device {
                host_path: m.host_path,
                path: m.path,
            })
            .collect())
    }
}
