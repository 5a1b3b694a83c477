use std::path::Path;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;

use super::driver_discoverer;
use super::Context;
use crate::discover::merge;
use crate::discover::CharDevices;
use crate::discover::DeviceFolderPermissions;
use crate::discover::Device;
use crate::discover::Discover;
use crate::discover::DiscoverRef;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::generator::DeviceSpecGenerator;
use crate::generator::GeneratorArena;
use crate::generator::IMEX_CHANNEL_PREFIX;

const MANAGEMENT_DEVICE_NODES: &[&str] = &[
    "/dev/nvidia*",
    "/dev/nvidia-caps/nvidia-cap*",
    "/dev/nvidia-modeset",
    "/dev/nvidia-uvm-tools",
    "/dev/nvidia-uvm",
    "/dev/nvidiactl",
];

/// Nodes owned by other subsystems are never part of the management device.
const BLOCKED_NODE_PREFIXES: &[&str] = &["nvidia-fs", "nvidia-nvswitch", "nvidia-nvlink"];

/// Every NVIDIA device node on the host as a single `all` device, for
/// management containers.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ManagementFactory;

impl ManagementFactory {
    pub fn generators(&self, ctx: &Context) -> NvcdiResult<GeneratorArena> {
        let mut patterns: Vec<String> = MANAGEMENT_DEVICE_NODES.iter().map(|p| p.to_string()).collect();
        patterns.push(format!("{IMEX_CHANNEL_PREFIX}*"));
        let nodes: DiscoverRef = Arc::new(ManagementDevices(CharDevices::new(&ctx.dev_root, patterns)));

        if nodes.devices()?.is_empty() {
            return Err(Report::new(NvcdiError::discovery("devices", "no NVIDIA device nodes found")));
        }

        let permissions = DeviceFolderPermissions::new(nodes.clone(), ctx.hook_creator.clone());
        Ok(GeneratorArena::with_generator(DeviceSpecGenerator::All {
            devices: merge([nodes, Arc::new(permissions) as DiscoverRef]),
        }))
    }

    /// Driver files for the version of the installed `libcuda.so`.
    pub fn common_edits(&self, ctx: &Context) -> NvcdiResult<DiscoverRef> {
        let version = ctx.driver.version().attach_printable("failed to get CUDA version")?;
        driver_discoverer(ctx, &version)
    }
}

#[derive(Debug)]
struct ManagementDevices(CharDevices);

impl Discover for ManagementDevices {
    fn devices(&self) -> NvcdiResult<Vec<Device>> {
        Ok(self
            .0
            .devices()?
            .into_iter()
            .filter(|d| !is_blocked(&d.host_path))
            .collect())
    }
}

fn is_blocked(path: &str) -> bool {
    let name = Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or_default();
    BLOCKED_NODE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}
