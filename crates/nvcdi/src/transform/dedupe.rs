use std::collections::HashSet;
use std::hash::Hash;

use super::all_edits_mut;
use super::Transform;
use crate::cdi;
use crate::error::NvcdiResult;

/// Removes repeated device nodes, mounts, hooks and environment variables
/// within each set of edits, keeping the first occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dedupe;

fn dedupe<T: Eq + Hash + Clone>(entries: &mut Vec<T>) {
    let mut seen = HashSet::new();
    entries.retain(|e| seen.insert(e.clone()));
}

impl Dedupe {
    pub(crate) fn edits(edits: &mut cdi::ContainerEdits) {
        dedupe(&mut edits.device_nodes);
        dedupe(&mut edits.env);
        dedupe(&mut edits.hooks);
        dedupe(&mut edits.mounts);
    }
}

impl Transform for Dedupe {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()> {
        all_edits_mut(spec).for_each(Self::edits);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn keeps_first_occurrence() {
        let node = |path: &str| cdi::DeviceNode {
            path: path.to_string(),
            ..Default::default()
        };
        let mut spec = cdi::Spec {
            container_edits: cdi::ContainerEdits {
                env: vec!["A=1".to_string(), "B=2".to_string(), "A=1".to_string()],
                ..Default::default()
            },
            devices: vec![cdi::Device {
                name: "0".to_string(),
                container_edits: cdi::ContainerEdits {
                    device_nodes: vec![node("/dev/nvidia0"), node("/dev/nvidiactl"), node("/dev/nvidia0")],
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        Dedupe.transform(&mut spec).unwrap();
        assert_eq!(spec.container_edits.env, vec!["A=1", "B=2"]);
        assert_eq!(
            spec.devices[0].container_edits.device_nodes,
            vec![node("/dev/nvidia0"), node("/dev/nvidiactl")]
        );
    }
}
