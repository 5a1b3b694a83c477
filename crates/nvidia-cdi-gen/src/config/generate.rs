use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::ArgAction;
use clap::Parser;
use nvcdi::ContainerRequest;
use nvcdi::Format;
use nvcdi::Library;
use nvcdi::MergedDeviceOptions;
use nvcdi::Options;
use nvcdi::RequestOptions;

use crate::config::library::LibraryArgs;
use crate::config::nvcdi_error;

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub library: LibraryArgs,

    #[arg(help = "Device identifiers to include; all devices if none are given")]
    pub devices: Vec<String>,

    #[arg(
        long,
        help = "File to write the spec to; stdout if unset",
        env = "NVIDIA_CDI_OUTPUT",
        value_hint = clap::ValueHint::FilePath
    )]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        help = "Output format (yaml or json); taken from the output extension if unset",
        env = "NVIDIA_CDI_FORMAT"
    )]
    pub format: Option<String>,

    #[arg(long, help = "Do not add a device combining all generated devices")]
    pub no_merged_device: bool,

    #[arg(
        long,
        help = "Take the requested devices from an OCI runtime spec (config.json)",
        value_hint = clap::ValueHint::FilePath
    )]
    pub oci_spec: Option<PathBuf>,

    #[arg(long = "annotation-prefix", help = "Annotation prefix carrying CDI device requests")]
    pub annotation_prefixes: Vec<String>,

    #[arg(long, help = "Accept device requests made through /dev/null volume mounts")]
    pub accept_device_list_as_volume_mounts: bool,

    #[arg(
        long,
        help = "Accept device requests made through the environment of unprivileged containers",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub accept_envvar_unprivileged: bool,
}

impl GenerateArgs {
    pub fn options(&self) -> Result<Options> {
        let mut options = self.library.options()?;
        if self.no_merged_device {
            options.merged_device = None;
        } else if options.merged_device.is_none() {
            options.merged_device = Some(MergedDeviceOptions {
                skip_if_exists: true,
                ..Default::default()
            });
        }
        Ok(options)
    }

    pub fn format(&self) -> Result<Option<Format>> {
        self.format
            .as_deref()
            .map(|f| f.parse().map_err(nvcdi_error))
            .transpose()
    }

    /// The ids to generate: from the OCI spec if given, else the positional
    /// arguments.
    pub fn device_ids(&self, lib: &Library) -> Result<Vec<String>> {
        let Some(path) = &self.oci_spec else {
            return Ok(self.devices.clone());
        };
        let json = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let request = ContainerRequest::from_oci_spec(&json, self.request_options()).map_err(nvcdi_error)?;

        let ids = lib.requested_ids(&request);
        if ids.is_empty() {
            tracing::info!("No devices requested by {}", path.display());
            return Ok(vec!["none".to_string()]);
        }
        Ok(ids)
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            annotation_prefixes: self.annotation_prefixes.clone(),
            accept_device_list_as_volume_mounts: self.accept_device_list_as_volume_mounts,
            accept_envvar_unprivileged: self.accept_envvar_unprivileged,
            ..Default::default()
        }
    }
}
