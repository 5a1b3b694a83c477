use std::sync::LazyLock;

/// `<release>-<commit>[-dirty]`, e.g. `1.2.0-3f2a9c1`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format_version(
        env!("NVIDIA_CDI_VERSION"),
        option_env!("VERGEN_GIT_SHA"),
        option_env!("VERGEN_GIT_DIRTY"),
    )
});

fn format_version(release: &str, sha: Option<&str>, dirty: Option<&str>) -> String {
    let sha = sha.map(|sha| &sha[..sha.len().min(7)]).unwrap_or("unknown");
    let dirty = if dirty == Some("true") { "-dirty" } else { "" };
    format!("{release}-{sha}{dirty}")
}
