//! Mount specs read from the Tegra `host-files-for-container.d` CSV files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_MOUNT_SPEC_DIR: &str = "/etc/nvidia-container-runtime/host-files-for-container.d";
const DEFAULT_MOUNT_SPEC_FILES: &[&str] = &["devices.csv", "drivers.csv", "l4t.csv"];

/// The base CSV files in the default mount spec directory.
pub fn default_csv_files() -> Vec<PathBuf> {
    DEFAULT_MOUNT_SPEC_FILES
        .iter()
        .map(|file| Path::new(DEFAULT_MOUNT_SPEC_DIR).join(file))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum MountSpecType {
    /// Character devices.
    #[display("dev")]
    Dev,
    #[display("dir")]
    Dir,
    /// Libraries or regular files.
    #[display("lib")]
    Lib,
    #[display("sym")]
    Sym,
}

impl FromStr for MountSpecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "dir" => Ok(Self::Dir),
            "lib" => Ok(Self::Lib),
            "sym" => Ok(Self::Sym),
            _ => Err(format!("unexpected mount type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub kind: MountSpecType,
    pub path: String,
}

impl FromStr for MountSpec {
    type Err = String;

    /// Parses a `type, path` line.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let Some((kind, path)) = line.trim().split_once(',') else {
            return Err(format!("failed to parse line: {line}"));
        };
        let kind = kind.trim().parse()?;
        let path = path.trim();
        if path.is_empty() {
            return Err("invalid path: empty".to_string());
        }
        Ok(Self {
            kind,
            path: path.to_string(),
        })
    }
}

/// Mount spec paths grouped by type, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSpecs(BTreeMap<MountSpecType, Vec<String>>);

impl MountSpecs {
    pub fn parse(content: &str) -> Self {
        let mut specs = Self::default();
        for line in content.lines() {
            match line.parse::<MountSpec>() {
                Ok(spec) => specs.push(spec.kind, spec.path),
                Err(e) => tracing::debug!("Skipping invalid mount spec {line:?}: {e}"),
            }
        }
        specs
    }

    /// Loads and concatenates the specs of each file; unreadable or empty
    /// files are skipped with a warning.
    pub fn from_csv_files(files: &[PathBuf]) -> Self {
        let mut specs = Self::default();
        for file in files {
            let content = match fs::read_to_string(file) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("Skipping CSV file {}: {e}", file.display());
                    continue;
                }
            };
            let parsed = Self::parse(&content);
            if parsed.is_empty() {
                tracing::warn!("Skipping CSV file {}: CSV file is empty", file.display());
                continue;
            }
            specs = specs.merge(parsed);
        }
        specs
    }

    pub fn device_nodes<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut specs = Self::default();
        for path in paths {
            specs.push(MountSpecType::Dev, path.into());
        }
        specs
    }

    pub fn push(&mut self, kind: MountSpecType, path: String) {
        self.0.entry(kind).or_default().push(path);
    }

    pub fn paths(&self, kind: MountSpecType) -> &[String] {
        self.0.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    pub fn merge(mut self, other: MountSpecs) -> Self {
        for (kind, paths) in other.0 {
            self.0.entry(kind).or_default().extend(paths);
        }
        self
    }

    /// Applies `filter` to the paths of one type.
    pub(crate) fn retain(mut self, kind: MountSpecType, filter: impl Fn(&str) -> bool) -> Self {
        if let Some(paths) = self.0.get_mut(&kind) {
            paths.retain(|p| filter(p));
        }
        self
    }

    pub(crate) fn remove(mut self, kind: MountSpecType) -> Self {
        self.0.remove(&kind);
        self
    }
}
