use super::ContainerEdits;
use super::Spec;

pub const CURRENT_VERSION: &str = "0.7.0";

const V030: &str = "0.3.0";
const V040: &str = "0.4.0";
const V050: &str = "0.5.0";
const V060: &str = "0.6.0";
const V070: &str = "0.7.0";

/// Returns the lowest CDI version able to represent `spec`.
pub fn minimum_required_version(spec: &Spec) -> &'static str {
    if requires_v070(spec) {
        V070
    } else if requires_v060(spec) {
        V060
    } else if requires_v050(spec) {
        V050
    } else if requires_v040(spec) {
        V040
    } else {
        V030
    }
}

fn all_edits(spec: &Spec) -> impl Iterator<Item = &ContainerEdits> {
    std::iter::once(&spec.container_edits).chain(spec.devices.iter().map(|d| &d.container_edits))
}

fn requires_v070(spec: &Spec) -> bool {
    all_edits(spec).any(|e| !e.additional_gids.is_empty())
}

fn requires_v060(spec: &Spec) -> bool {
    if !spec.annotations.is_empty() || spec.devices.iter().any(|d| !d.annotations.is_empty()) {
        return true;
    }
    spec.kind
        .split_once('/')
        .is_some_and(|(_, class)| class.contains('.'))
}

fn requires_v050(spec: &Spec) -> bool {
    let name_needs_v050 = spec
        .devices
        .iter()
        .any(|d| d.name.chars().next().is_some_and(|c| !c.is_ascii_alphabetic()));
    name_needs_v050
        || all_edits(spec).any(|e| e.device_nodes.iter().any(|n| n.host_path.is_some()))
}

fn requires_v040(spec: &Spec) -> bool {
    all_edits(spec).any(|e| e.mounts.iter().any(|m| m.mount_type.is_some()))
}
