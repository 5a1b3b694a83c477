use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;

use super::Context;
use crate::discover::CharDevices;
use crate::discover::Discover;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::generator::DeviceSpecGenerator;
use crate::generator::GeneratorArena;
use crate::generator::IMEX_CHANNEL_PREFIX;

/// IMEX channels, one device per channel id.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ImexFactory;

impl ImexFactory {
    pub fn generators(&self, ctx: &Context, ids: &[String]) -> NvcdiResult<GeneratorArena> {
        let mut arena = GeneratorArena::new(None);
        for id in channel_ids(ctx, ids)? {
            arena.push(DeviceSpecGenerator::ImexChannel { id });
        }
        Ok(arena)
    }
}

/// Accepts `<n>` or `channel<n>`; `all` expands to the channels present on
/// the host.
fn channel_ids(ctx: &Context, ids: &[String]) -> NvcdiResult<Vec<String>> {
    let mut channels = Vec::new();
    for id in ids {
        let trimmed = id.strip_prefix("channel").unwrap_or(id);
        if trimmed == "all" {
            return all_channel_ids(ctx);
        }
        trimmed.parse::<u64>().map_err(|e| {
            Report::new(NvcdiError::InvalidIdentifier {
                id: id.clone(),
                message: format!("invalid channel ID: {e}"),
            })
        })?;
        channels.push(trimmed.to_string());
    }
    Ok(channels)
}

fn all_channel_ids(ctx: &Context) -> NvcdiResult<Vec<String>> {
    let channels = CharDevices::new(&ctx.dev_root, [format!("{IMEX_CHANNEL_PREFIX}*")])
        .devices()
        .attach_printable("failed to discover IMEX channels")?;
    Ok(channels
        .iter()
        .filter_map(|c| Path::new(&c.path).file_name()?.to_str())
        .map(|name| name.trim_start_matches("channel").to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::mode::Mode;
    use crate::test_support::FakeHost;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn explicit_channels() {
        let host = FakeHost::new();
        let ctx = Context::new(Mode::Imex, &host.options());
        let devices = ImexFactory
            .generators(&ctx, &ids(&["channel3", "7"]))
            .unwrap()
            .device_specs(&ctx)
            .unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["3", "7"]);

        let node = &devices[0].container_edits.device_nodes[0];
        assert_eq!(node.path, "/dev/nvidia-caps-imex-channels/channel3");
        assert_eq!(
            node.host_path.as_deref(),
            Some(host.host_path("/dev/nvidia-caps-imex-channels/channel3").as_str())
        );
    }

    #[test]
    fn all_lists_host_channels() {
        let host = FakeHost::new();
        host.char_device("/dev/nvidia-caps-imex-channels/channel0")
            .char_device("/dev/nvidia-caps-imex-channels/channel12");
        let ctx = Context::new(Mode::Imex, &host.options());
        let arena = ImexFactory.generators(&ctx, &ids(&["all"])).unwrap();
        let mut names: Vec<_> = arena
            .device_specs(&ctx)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["0", "12"]);
    }

    #[test]
    fn invalid_channel_ids() {
        let host = FakeHost::new();
        let ctx = Context::new(Mode::Imex, &host.options());
        let err = ImexFactory.generators(&ctx, &ids(&["channelX"])).unwrap_err();
        assert!(err
            .current_context()
            .to_string()
            .starts_with("invalid device identifier \"channelX\": invalid channel ID"));
    }
}
