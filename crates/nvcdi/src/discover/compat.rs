use std::sync::Arc;

use super::Discover;
use super::Hook;
use super::HookCreator;
use super::HookName;
use crate::error::NvcdiResult;

/// Emits the `enable-cuda-compat` hook.
#[derive(Debug)]
pub struct CudaCompatHook {
    hook_creator: Arc<HookCreator>,
    host_cuda_version: Option<String>,
    compat_container_root: Option<String>,
}

impl CudaCompatHook {
    /// `cuda_driver_version` is the NVML encoding, e.g. `12040` for 12.4.
    pub fn new(
        hook_creator: Arc<HookCreator>,
        cuda_driver_version: Option<i32>,
        compat_container_root: Option<String>,
    ) -> Self {
        Self {
            hook_creator,
            host_cuda_version: cuda_driver_version
                .map(|v| format!("{}.{}", v / 1000, v % 1000 / 10)),
            compat_container_root,
        }
    }
}

impl Discover for CudaCompatHook {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        let mut args = Vec::new();
        if let Some(version) = &self.host_cuda_version {
            args.push(format!("--host-cuda-version={version}"));
        }
        if let Some(root) = &self.compat_container_root {
            args.push(format!("--cuda-compat-container-root={root}"));
        }
        Ok(self
            .hook_creator
            .create(HookName::EnableCudaCompat, &args)
            .into_iter()
            .collect())
    }
}
