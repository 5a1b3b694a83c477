//! Conversion of discovered resources into CDI container edits.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::MetadataExt;

use crate::cdi;
use crate::discover::Device;
use crate::discover::Discover;
use crate::discover::Hook;
use crate::discover::Mount;
use crate::error::NvcdiResult;

// Go os.FileMode type bits, as used in the CDI schema.
const MODE_DEVICE: u32 = 1 << 26;
const MODE_CHAR_DEVICE: u32 = 1 << 21;

#[derive(Debug, Clone, Copy, Default)]
pub struct EditsFactory {
    no_additional_gids: bool,
}

impl EditsFactory {
    pub fn new(no_additional_gids: bool) -> Self {
        Self { no_additional_gids }
    }

    pub fn from_discoverer(&self, discoverer: &dyn Discover) -> NvcdiResult<cdi::ContainerEdits> {
        let devices = discoverer.devices()?;
        let env = discoverer.env_vars()?;
        let mounts = discoverer.mounts()?;
        let hooks = discoverer.hooks()?;

        let mut edits = cdi::ContainerEdits {
            env,
            ..Default::default()
        };
        for device in devices {
            let (node, gid) = self.device_node(&device);
            edits.device_nodes.push(node);
            if let Some(gid) = gid {
                if !edits.additional_gids.contains(&gid) {
                    edits.additional_gids.push(gid);
                }
            }
        }
        edits.mounts = mounts.into_iter().map(mount).collect();
        edits.hooks = hooks.into_iter().map(hook).collect();
        Ok(edits)
    }

    /// Builds the device node and the group that must be added to the
    /// container process to access it, if any.
    fn device_node(&self, device: &Device) -> (cdi::DeviceNode, Option<u32>) {
        let host_path = (device.host_path != device.path && !device.host_path.is_empty())
            .then(|| device.host_path.clone());
        let mut node = cdi::DeviceNode {
            path: device.path.clone(),
            host_path,
            ..Default::default()
        };

        let stat_path = node.host_path.as_deref().unwrap_or(&node.path);
        let metadata = match fs::metadata(stat_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!("Failed to stat {stat_path}: {e}");
                return (node, None);
            }
        };

        let file_type = metadata.file_type();
        let is_char = file_type.is_char_device();
        if is_char || file_type.is_block_device() {
            let rdev = metadata.rdev();
            let (major, minor) = (libc::major(rdev), libc::minor(rdev));
            node.node_type = Some(if is_char { "c" } else { "b" }.to_string());
            node.major = Some(i64::from(major));
            node.minor = Some(i64::from(minor));
        }
        let perm = metadata.mode() & 0o777;
        node.file_mode = Some(if is_char {
            perm | MODE_DEVICE | MODE_CHAR_DEVICE
        } else {
            perm
        });
        node.permissions = Some("rwm".to_string());
        let gid = metadata.gid();
        node.gid = Some(gid);

        let world_rw = perm & 0o006 == 0o006;
        let additional_gid = (gid != 0 && is_char && !world_rw && !self.no_additional_gids).then_some(gid);
        (node, additional_gid)
    }
}

fn mount(mount: Mount) -> cdi::Mount {
    cdi::Mount {
        host_path: mount.host_path,
        container_path: mount.path,
        options: mount.options,
        mount_type: None,
    }
}

fn hook(hook: Hook) -> cdi::Hook {
    cdi::Hook {
        hook_name: hook.lifecycle,
        path: hook.path,
        args: hook.args,
        env: hook.env,
        timeout: None,
    }
}
