//! Building, validating and writing CDI spec documents.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use crate::cdi;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::options::MergedDeviceOptions;
use crate::transform::MergedDevice;
use crate::transform::Simplifier;
use crate::transform::Transform;

pub const DEFAULT_VENDOR: &str = "nvidia.com";
pub const DEFAULT_CLASS: &str = "gpu";
pub const DEFAULT_PERMISSIONS: u32 = 0o600;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Yaml,
    Json,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Yaml => ".yaml",
            Format::Json => ".json",
        }
    }

    /// The format implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" => Some(Format::Yaml),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Yaml => "yaml",
            Format::Json => "json",
        })
    }
}

impl FromStr for Format {
    type Err = Report<NvcdiError>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" => Ok(Format::Yaml),
            "json" => Ok(Format::Json),
            _ => Err(Report::new(NvcdiError::InvalidOption {
                message: format!("unsupported spec format {s:?}"),
            })),
        }
    }
}

/// Assembles a [`Spec`] from device specs and common edits.
#[derive(Debug, Default)]
pub struct SpecBuilder {
    raw: Option<cdi::Spec>,
    version: Option<String>,
    vendor: Option<String>,
    class: Option<String>,
    devices: Vec<cdi::Device>,
    edits: cdi::ContainerEdits,
    format: Format,
    merged_device: Option<MergedDeviceOptions>,
    no_simplify: bool,
    permissions: Option<u32>,
}

impl SpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing spec; it is written back without simplification.
    pub fn raw(mut self, raw: cdi::Spec) -> Self {
        self.raw = Some(raw);
        self.no_simplify = true;
        self
    }

    pub fn devices(mut self, devices: Vec<cdi::Device>) -> Self {
        self.devices = devices;
        self
    }

    pub fn edits(mut self, edits: cdi::ContainerEdits) -> Self {
        self.edits = edits;
        self
    }

    /// Pins the CDI version; by default the minimum required is detected.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn merged_device(mut self, options: Option<MergedDeviceOptions>) -> Self {
        self.merged_device = options;
        self
    }

    pub fn no_simplify(mut self, no_simplify: bool) -> Self {
        self.no_simplify = no_simplify;
        self
    }

    pub fn permissions(mut self, mode: u32) -> Self {
        self.permissions = Some(mode);
        self
    }

    pub fn build(self) -> NvcdiResult<Spec> {
        let mut raw = match self.raw {
            Some(raw) => raw,
            None => {
                let vendor = self.vendor.unwrap_or_else(|| DEFAULT_VENDOR.to_string());
                let class = self.class.unwrap_or_else(|| DEFAULT_CLASS.to_string());
                cdi::validate_vendor_name(&vendor)?;
                cdi::validate_class_name(&class)?;
                cdi::Spec {
                    cdi_version: self.version.clone().unwrap_or_default(),
                    kind: format!("{vendor}/{class}"),
                    annotations: Default::default(),
                    devices: self.devices,
                    container_edits: self.edits,
                }
            }
        };

        if !self.no_simplify {
            Simplifier.transform(&mut raw).attach_printable("failed to simplify spec")?;
        }
        if let Some(merged) = self.merged_device {
            MergedDevice::new(merged.name, merged.skip_if_exists)?
                .transform(&mut raw)
                .attach_printable("failed to merge devices")?;
        }
        if raw.cdi_version.is_empty() {
            raw.cdi_version = cdi::minimum_required_version(&raw).to_string();
        }
        let mut names = HashSet::new();
        for device in &raw.devices {
            cdi::validate_device_name(&device.name)?;
            if !names.insert(device.name.as_str()) {
                return Err(Report::new(NvcdiError::spec(format!(
                    "duplicate device name {:?}",
                    device.name
                ))));
            }
        }

        Ok(Spec {
            raw,
            format: self.format,
            permissions: self.permissions.unwrap_or(DEFAULT_PERMISSIONS),
        })
    }
}

/// A complete spec together with how it is written out.
#[derive(Debug, Clone)]
pub struct Spec {
    raw: cdi::Spec,
    format: Format,
    permissions: u32,
}

impl Spec {
    pub fn builder() -> SpecBuilder {
        SpecBuilder::new()
    }

    pub fn raw(&self) -> &cdi::Spec {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut cdi::Spec {
        &mut self.raw
    }

    pub fn into_raw(self) -> cdi::Spec {
        self.raw
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Sets the format used by `write_to` and by `save` for paths without
    /// a known extension.
    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    /// Serializes the spec in `format`.
    pub fn render(&self, format: Format) -> NvcdiResult<String> {
        match format {
            Format::Yaml => serde_yaml::to_string(&self.raw)
                .change_context_lazy(|| NvcdiError::spec("failed to marshal spec as YAML")),
            Format::Json => serde_json::to_string_pretty(&self.raw)
                .map(|mut json| {
                    json.push('\n');
                    json
                })
                .change_context_lazy(|| NvcdiError::spec("failed to marshal spec as JSON")),
        }
    }

    /// Writes the spec to `path` and returns the path actually written.
    ///
    /// Paths without a `.yaml` or `.json` extension get the extension of the
    /// spec's format. The file is replaced atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> NvcdiResult<PathBuf> {
        let path = self.normalize_path(path.as_ref())?;
        let format = Format::from_path(&path).unwrap_or(self.format);
        let content = self.render(format)?;

        let dir = path
            .parent()
            .ok_or_else(|| Report::new(NvcdiError::io(format!("invalid spec path {}", path.display()))))?;
        fs::create_dir_all(dir)
            .change_context_lazy(|| NvcdiError::io(format!("failed to create {}", dir.display())))?;

        let mut file = tempfile::Builder::new()
            .prefix(".nvcdi-spec-")
            .suffix(format.extension())
            .tempfile_in(dir)
            .change_context_lazy(|| NvcdiError::io("failed to create temporary spec file"))?;
        file.write_all(content.as_bytes())
            .change_context_lazy(|| NvcdiError::io("failed to write spec"))?;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(self.permissions))
            .change_context_lazy(|| NvcdiError::io("failed to set permissions on spec file"))?;
        file.persist(&path)
            .change_context_lazy(|| NvcdiError::io(format!("failed to write {}", path.display())))?;

        tracing::info!("Generated CDI spec with version {}", self.raw.cdi_version);
        Ok(path)
    }

    pub fn write_to(&self, writer: &mut dyn Write) -> NvcdiResult<()> {
        let content = self.render(self.format)?;
        writer
            .write_all(content.as_bytes())
            .change_context_lazy(|| NvcdiError::io("failed to write spec"))
    }

    fn normalize_path(&self, path: &Path) -> NvcdiResult<PathBuf> {
        let mut path = path.to_path_buf();
        if Format::from_path(&path).is_none() {
            let mut name = path.into_os_string();
            name.push(self.format.extension());
            path = PathBuf::from(name);
        }
        if path.is_relative() {
            let cwd = std::env::current_dir()
                .change_context_lazy(|| NvcdiError::io("failed to get current working directory"))?;
            path = cwd.join(path);
        }
        Ok(path)
    }
}
