use std::cmp::Ordering;
use std::path::Path;

use super::all_edits_mut;
use super::Transform;
use crate::cdi;
use crate::error::NvcdiResult;

/// Orders devices by name, and device nodes and mounts by container path
/// depth then path. Hook order is significant and kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sorter;

fn depth(path: &str) -> usize {
    Path::new(path).components().count()
}

fn by_depth_then_path(a: &str, b: &str) -> Ordering {
    depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
}

impl Transform for Sorter {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()> {
        for edits in all_edits_mut(spec) {
            edits.device_nodes.sort_by(|a, b| by_depth_then_path(&a.path, &b.path));
            edits.mounts.sort_by(|a, b| by_depth_then_path(&a.container_path, &b.container_path));
        }
        spec.devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn shallow_paths_first() {
        let node = |path: &str| cdi::DeviceNode {
            path: path.to_string(),
            ..Default::default()
        };
        let mut spec = cdi::Spec {
            container_edits: cdi::ContainerEdits {
                device_nodes: vec![
                    node("/dev/nvidia-caps/nvidia-cap1"),
                    node("/dev/nvidiactl"),
                    node("/dev/dri/card1"),
                    node("/dev/nvidia0"),
                ],
                ..Default::default()
            },
            ..Default::default()
        };
        Sorter.transform(&mut spec).unwrap();
        let paths: Vec<_> = spec
            .container_edits
            .device_nodes
            .iter()
            .map(|n| n.path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["/dev/nvidia0", "/dev/nvidiactl", "/dev/dri/card1", "/dev/nvidia-caps/nvidia-cap1"]
        );
    }
}
