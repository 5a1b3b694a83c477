use std::collections::HashSet;

use super::Dedupe;
use super::Sorter;
use super::Transform;
use crate::cdi;
use crate::error::NvcdiResult;

/// Dedupes, drops device edits already present in the spec-level edits,
/// then sorts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Simplifier;

impl Transform for Simplifier {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()> {
        Dedupe.transform(spec)?;
        remove_common_edits(spec);
        Sorter.transform(spec)
    }
}

/// A device whose edits would become empty keeps them untouched.
fn remove_common_edits(spec: &mut cdi::Spec) {
    let common = &spec.container_edits;
    let nodes: HashSet<_> = common.device_nodes.iter().cloned().collect();
    let env: HashSet<_> = common.env.iter().cloned().collect();
    let hooks: HashSet<_> = common.hooks.iter().cloned().collect();
    let mounts: HashSet<_> = common.mounts.iter().cloned().collect();

    for device in &mut spec.devices {
        let mut edits = device.container_edits.clone();
        edits.device_nodes.retain(|n| !nodes.contains(n));
        edits.env.retain(|e| !env.contains(e));
        edits.hooks.retain(|h| !hooks.contains(h));
        edits.mounts.retain(|m| !mounts.contains(m));
        if !edits.is_empty() {
            device.container_edits = edits;
        }
    }
}
