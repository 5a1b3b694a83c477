//! MIG capability device minors from `/proc/driver/nvidia-caps/mig-minors`.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use error_stack::Report;

use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::lookup::join_root;

pub const MIG_MINORS_PATH: &str = "/proc/driver/nvidia-caps/mig-minors";
const CAP_DEVICE_PREFIX: &str = "/dev/nvidia-caps/nvidia-cap";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigCap(String);

impl MigCap {
    pub fn gpu_instance(gpu: u32, gi: u32) -> Self {
        Self(format!("gpu{gpu}/gi{gi}/access"))
    }

    pub fn compute_instance(gpu: u32, gi: u32, ci: u32) -> Self {
        Self(format!("gpu{gpu}/gi{gi}/ci{ci}/access"))
    }

    fn parse(cap: &str) -> Option<Self> {
        if cap == "config" || cap == "monitor" {
            return Some(Self(cap.to_string()));
        }
        let parts: Vec<&str> = cap.split('/').collect();
        let numbered = |part: &str, prefix: &str| {
            part.strip_prefix(prefix)
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        };
        let valid = match parts.as_slice() {
            [gpu, gi, "access"] => numbered(gpu, "gpu") && numbered(gi, "gi"),
            [gpu, gi, ci, "access"] => numbered(gpu, "gpu") && numbered(gi, "gi") && numbered(ci, "ci"),
            _ => false,
        };
        valid.then(|| Self(cap.to_string()))
    }
}

impl fmt::Display for MigCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps MIG capabilities to their `nvidia-cap` device minors.
#[derive(Debug, Clone, Default)]
pub struct MigMinors(HashMap<MigCap, u32>);

impl MigMinors {
    /// Reads the minors below `system_root`; a missing file yields no caps.
    pub fn load(system_root: &Path) -> NvcdiResult<Self> {
        let path = join_root(system_root, MIG_MINORS_PATH);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Report::new(NvcdiError::io(format!(
                "failed to read {}: {e}",
                path.display()
            )))),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut caps = HashMap::new();
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (Some(cap), Some(minor), None) = (fields.next(), fields.next(), fields.next()) else {
                continue;
            };
            let (Some(cap), Ok(minor)) = (MigCap::parse(cap), minor.parse::<u32>()) else {
                tracing::debug!("Skipping invalid mig-minors line {line:?}");
                continue;
            };
            caps.insert(cap, minor);
        }
        Self(caps)
    }

    /// Container path of the device node for `cap`.
    pub fn device_path(&self, cap: &MigCap) -> NvcdiResult<String> {
        self.0
            .get(cap)
            .map(|minor| format!("{CAP_DEVICE_PREFIX}{minor}"))
            .ok_or_else(|| {
                Report::new(NvcdiError::discovery(
                    "MIG capabilities",
                    format!("invalid MIG capability path {cap}"),
                ))
            })
    }
}
