mod common;

use nvcdi::HookName;
use nvcdi::Library;
use nvcdi::MergedDeviceOptions;
use nvcdi::Mode;
use similar_asserts::assert_eq;

use crate::common::ids;
use crate::common::TestHost;

fn node_paths(device: &nvcdi::cdi::Device) -> Vec<&str> {
    device.container_edits.device_nodes.iter().map(|n| n.path.as_str()).collect()
}

#[test_log::test]
fn gated_mode_yields_a_single_all_device() {
    let host = TestHost::new();
    host.char_device("/dev/gdrdrv");
    let lib = Library::new(host.options(Mode::Gdrcopy));

    let spec = lib.get_spec(&[]).unwrap();
    let raw = spec.raw();
    assert_eq!(raw.kind, "nvidia.com/gdrcopy");
    assert_eq!(raw.cdi_version, "0.5.0");
    assert_eq!(raw.devices.len(), 1);
    assert_eq!(raw.devices[0].name, "all");
    assert_eq!(node_paths(&raw.devices[0]), vec!["/dev/gdrdrv"]);
    assert_eq!(raw.container_edits.env, vec!["NVIDIA_VISIBLE_DEVICES=void"]);
    assert!(lib.get_common_edits().unwrap().is_empty());
}

#[test_log::test]
fn imex_channels_by_id() {
    let host = TestHost::new();
    host.char_device("/dev/nvidia-caps-imex-channels/channel0")
        .char_device("/dev/nvidia-caps-imex-channels/channel1");
    let lib = Library::new(host.options(Mode::Imex));
    assert_eq!(lib.kind(), "nvidia.com/imex-channel");

    let devices = lib.get_device_specs_by_id(&ids(&["channel1"])).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "1");
    assert_eq!(node_paths(&devices[0]), vec!["/dev/nvidia-caps-imex-channels/channel1"]);

    assert_eq!(
        lib.list_devices().unwrap(),
        vec!["nvidia.com/imex-channel=0", "nvidia.com/imex-channel=1"]
    );
    assert!(lib.get_device_specs_by_id(&ids(&["channel-x"])).is_err());
}

#[test_log::test]
fn csv_mode_without_nvml() {
    let host = TestHost::new();
    host.char_device("/dev/nvhost-ctrl")
        .char_device("/dev/nvmap")
        .file("/usr/lib/aarch64-linux-gnu/tegra/libnvrm_gpu.so", "")
        .file(
            "/csv/l4t.csv",
            "dev, /dev/nvhost-ctrl\n\
             dev, /dev/nvmap\n\
             lib, /usr/lib/aarch64-linux-gnu/tegra/libnvrm_gpu.so\n\
             not a spec line\n",
        );
    let mut options = host.options(Mode::Csv);
    options.csv_files = vec![host.path("/csv/l4t.csv")];
    options.disabled_hooks = vec![HookName::All];
    let lib = Library::new(options);

    let spec = lib.get_spec(&ids(&["all"])).unwrap();
    let raw = spec.raw();
    assert_eq!(raw.devices.len(), 1);
    assert_eq!(raw.devices[0].name, "all");
    assert_eq!(node_paths(&raw.devices[0]), vec!["/dev/nvhost-ctrl", "/dev/nvmap"]);

    let mounts: Vec<_> = raw.container_edits.mounts.iter().map(|m| m.container_path.as_str()).collect();
    assert_eq!(mounts, vec!["/usr/lib/aarch64-linux-gnu/tegra/libnvrm_gpu.so"]);
    assert!(raw.container_edits.hooks.is_empty());

    let err = lib.get_spec(&ids(&["1"])).unwrap_err();
    assert!(format!("{err:?}").contains("unsupported device id"));
}

#[test]
fn merged_device_is_skipped_when_present() {
    let host = TestHost::new();
    host.char_device("/dev/nvidia-nvswitch0")
        .char_device("/dev/nvidia-nvswitch1");
    let mut options = host.options(Mode::Nvswitch);
    options.merged_device = Some(MergedDeviceOptions {
        skip_if_exists: true,
        ..Default::default()
    });
    let lib = Library::new(options);

    let spec = lib.get_spec(&[]).unwrap();
    assert_eq!(spec.raw().devices.len(), 1);
    assert_eq!(
        node_paths(&spec.raw().devices[0]),
        vec!["/dev/nvidia-nvswitch0", "/dev/nvidia-nvswitch1"]
    );

    let mut options = host.options(Mode::Nvswitch);
    options.merged_device = Some(MergedDeviceOptions::default());
    assert!(Library::new(options).get_spec(&[]).is_err());
}
