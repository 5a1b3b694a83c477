//! Transformations of mount specs.

use std::path::Path;

use super::MountSpecType;
use super::MountSpecs;

/// Matches `path` against a glob; a `**/` prefix matches the basename only.
fn matches_pattern(pattern: &str, path: &str) -> bool {
    let (pattern, target) = match pattern.strip_prefix("**/") {
        Some(pattern) => (
            pattern,
            Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path),
        ),
        None => (pattern, path),
    };
    glob::Pattern::new(pattern).is_ok_and(|p| p.matches(target))
}

/// `/dev/nvidia<N>`.
fn is_regular_device_node(path: &str) -> bool {
    path.strip_prefix("/dev/nvidia")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

impl MountSpecs {
    pub fn only_device_nodes(self) -> Self {
        self.remove(MountSpecType::Dir)
            .remove(MountSpecType::Lib)
            .remove(MountSpecType::Sym)
    }

    pub fn without_device_nodes(self) -> Self {
        self.remove(MountSpecType::Dev)
    }

    pub fn without_regular_device_nodes(self) -> Self {
        self.retain(MountSpecType::Dev, |p| !is_regular_device_node(p))
    }

    /// Drops every path matching a pattern of the same type in `other`.
    pub fn without(self, other: &MountSpecs) -> Self {
        let mut specs = self;
        for kind in [MountSpecType::Dev, MountSpecType::Dir, MountSpecType::Lib, MountSpecType::Sym] {
            let patterns = other.paths(kind);
            if patterns.is_empty() {
                continue;
            }
            specs = specs.retain(kind, |p| !patterns.iter().any(|pattern| matches_pattern(pattern, p)));
        }
        specs
    }

    /// Drops symlink specs matching any of `patterns`.
    pub fn ignore_symlinks(self, patterns: &[String]) -> Self {
        self.retain(MountSpecType::Sym, |p| {
            !patterns.iter().any(|pattern| matches_pattern(pattern, p))
        })
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn specs() -> MountSpecs {
        MountSpecs::parse(
            "dev, /dev/nvidia0\n\
             dev, /dev/nvidia1\n\
             dev, /dev/nvidiactl\n\
             dev, /dev/nvidia-modeset\n\
             dev, /dev/nvhost-ctrl\n\
             lib, /usr/lib/aarch64-linux-gnu/tegra/libcuda.so.1.1\n\
             sym, /usr/lib/aarch64-linux-gnu/libcuda.so\n\
             sym, /usr/lib/aarch64-linux-gnu/tegra/libnvidia-ptxjitcompiler.so\n",
        )
    }

    #[test]
    fn device_node_selection() {
        let only = specs().only_device_nodes();
        assert!(only.paths(MountSpecType::Lib).is_empty());
        assert_eq!(only.paths(MountSpecType::Dev).len(), 5);

        let without = specs().without_device_nodes();
        assert!(without.paths(MountSpecType::Dev).is_empty());
        assert_eq!(without.paths(MountSpecType::Sym).len(), 2);
    }

    #[test]
    fn dgpu_removes_regular_and_control_nodes() {
        let dgpu = specs()
            .only_device_nodes()
            .without_regular_device_nodes()
            .without(&MountSpecs::device_nodes(["/dev/nvidiactl", "/dev/nvidia-modeset"]));
        assert_eq!(dgpu.paths(MountSpecType::Dev), ["/dev/nvhost-ctrl"]);
    }

    #[test]
    fn igpu_swaps_dgpu_node_for_display_node() {
        let igpu = specs()
            .only_device_nodes()
            .without(&MountSpecs::device_nodes(["/dev/nvidia1"]))
            .merge(MountSpecs::device_nodes(["/dev/nvidia2"]));
        assert_eq!(
            igpu.paths(MountSpecType::Dev),
            ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-modeset", "/dev/nvhost-ctrl", "/dev/nvidia2"]
        );
    }

    #[test]
    fn ignore_patterns_match_paths_or_basenames() {
        let ignored = specs().ignore_symlinks(&["**/libcuda.so".to_string()]);
        assert_eq!(
            ignored.paths(MountSpecType::Sym),
            ["/usr/lib/aarch64-linux-gnu/tegra/libnvidia-ptxjitcompiler.so"]
        );

        let ignored = specs().ignore_symlinks(&["/usr/lib/aarch64-linux-gnu/tegra/*".to_string()]);
        assert_eq!(ignored.paths(MountSpecType::Sym), ["/usr/lib/aarch64-linux-gnu/libcuda.so"]);
        assert_eq!(ignored.paths(MountSpecType::Lib).len(), 1);
    }

    #[test]
    fn regular_device_nodes() {
        assert!(is_regular_device_node("/dev/nvidia12"));
        assert!(!is_regular_device_node("/dev/nvidia"));
        assert!(!is_regular_device_node("/dev/nvidiactl"));
        assert!(!is_regular_device_node("/dev/nvidia-caps/nvidia-cap1"));
    }
}
