//! Discoverers produce the device nodes, mounts, hooks and environment
//! needed to expose some resource in a container.

mod char_devices;
mod compat;
mod drm;
mod folder_permissions;
mod gated;
mod graphics;
mod hooks;
mod ipc;
mod ldconfig;
mod mounts;
mod symlinks;

use std::fmt::Debug;
use std::sync::Arc;

use error_stack::ResultExt;

use crate::error::NvcdiError;
use crate::error::NvcdiResult;

pub use char_devices::CharDevices;
pub use compat::CudaCompatHook;
pub use drm::drm_device_nodes;
pub use drm::ByPathHooks;
pub use folder_permissions::DeviceFolderPermissions;
pub use gated::gated_discoverer;
pub use graphics::graphics_discoverer;
pub use hooks::HookCreator;
pub use hooks::HookName;
pub use hooks::CREATE_CONTAINER;
pub use ipc::ipc_discoverer;
pub use ldconfig::LdconfigHook;
pub use mounts::Mounts;
pub use symlinks::CreateSymlinksHook;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub host_path: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mount {
    pub host_path: String,
    pub path: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hook {
    pub lifecycle: String,
    pub path: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
}

pub type DiscoverRef = Arc<dyn Discover>;

/// A discoverer that yields nothing unless a query is overridden.
pub trait Discover: Debug + Send + Sync {
    fn devices(&self) -> NvcdiResult<Vec<Device>> {
        Ok(Vec::new())
    }

    fn mounts(&self) -> NvcdiResult<Vec<Mount>> {
        Ok(Vec::new())
    }

    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        Ok(Vec::new())
    }

    fn env_vars(&self) -> NvcdiResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Empty;

impl Discover for Empty {}

pub fn empty() -> DiscoverRef {
    Arc::new(Empty)
}

impl Discover for Hook {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        Ok(vec![self.clone()])
    }
}

impl Discover for Option<Hook> {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        Ok(self.iter().cloned().collect())
    }
}

/// Static environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvVars(pub Vec<String>);

impl Discover for EnvVars {
    fn env_vars(&self) -> NvcdiResult<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Concatenates the results of its discoverers in order.
#[derive(Debug, Clone, Default)]
pub struct Merged(Vec<DiscoverRef>);

pub fn merge(discoverers: impl IntoIterator<Item = DiscoverRef>) -> DiscoverRef {
    Arc::new(Merged(discoverers.into_iter().collect()))
}

impl Merged {
    fn collect<T>(
        &self,
        kind: &str,
        query: impl Fn(&dyn Discover) -> NvcdiResult<Vec<T>>,
    ) -> NvcdiResult<Vec<T>> {
        let mut all = Vec::new();
        for (i, discoverer) in self.0.iter().enumerate() {
            let found = query(discoverer.as_ref()).change_context_lazy(|| {
                NvcdiError::discovery(kind, format!("error discovering {kind} for discoverer {i}"))
            })?;
            all.extend(found);
        }
        Ok(all)
    }
}

impl Discover for Merged {
    fn devices(&self) -> NvcdiResult<Vec<Device>> {
        self.collect("devices", |d| d.devices())
    }

    fn mounts(&self) -> NvcdiResult<Vec<Mount>> {
        self.collect("mounts", |d| d.mounts())
    }

    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        self.collect("hooks", |d| d.hooks())
    }

    fn env_vars(&self) -> NvcdiResult<Vec<String>> {
        self.collect("environment variables", |d| d.env_vars())
    }
}
