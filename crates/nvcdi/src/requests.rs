//! Device requests made by a container, read from its OCI runtime spec.
//!
//! A container can ask for devices through CDI annotations, through
//! `/dev/null` volume mounts below [`DEVICE_LIST_AS_VOLUME_MOUNTS_ROOT`], or
//! through the `NVIDIA_VISIBLE_DEVICES` environment variable. The first source
//! that names any device wins.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use crate::cdi;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;

pub const DEVICE_LIST_AS_VOLUME_MOUNTS_ROOT: &str = "/var/run/nvidia-container-devices";

pub const ENV_VISIBLE_DEVICES: &str = "NVIDIA_VISIBLE_DEVICES";
pub const ENV_IMEX_CHANNELS: &str = "NVIDIA_IMEX_CHANNELS";
const ENV_CUDA_VERSION: &str = "CUDA_VERSION";
const ENV_REQUIRE_CUDA: &str = "NVIDIA_REQUIRE_CUDA";

const CAP_SYS_ADMIN: &str = "CAP_SYS_ADMIN";
const MOUNT_PREFIX_CDI: &str = "cdi/";
const MOUNT_PREFIX_IMEX: &str = "imex/";

/// Which request sources are honoured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequestOptions {
    /// Annotation key prefixes carrying CDI device names, e.g. `cdi.k8s.io/`.
    pub annotation_prefixes: Vec<String>,
    pub accept_device_list_as_volume_mounts: bool,
    /// Honour the environment variable in unprivileged containers.
    pub accept_envvar_unprivileged: bool,
    pub ignore_imex_channel_requests: bool,
    /// Checked in order before `NVIDIA_VISIBLE_DEVICES`.
    pub preferred_visible_device_env_vars: Vec<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            annotation_prefixes: Vec::new(),
            accept_device_list_as_volume_mounts: false,
            accept_envvar_unprivileged: true,
            ignore_imex_channel_requests: false,
            preferred_visible_device_env_vars: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMount {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// The parts of a container's runtime spec that carry device requests.
#[derive(Debug, Clone, Default)]
pub struct ContainerRequest {
    annotations: BTreeMap<String, String>,
    env: HashMap<String, String>,
    mounts: Vec<RequestMount>,
    privileged: bool,
    options: RequestOptions,
}

// Subset of the OCI runtime spec.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OciSpec {
    annotations: BTreeMap<String, String>,
    process: Option<OciProcess>,
    mounts: Vec<OciMount>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OciProcess {
    env: Vec<String>,
    capabilities: Option<OciCapabilities>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OciCapabilities {
    bounding: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OciMount {
    destination: PathBuf,
    #[serde(default)]
    source: PathBuf,
}

impl ContainerRequest {
    pub fn new(options: RequestOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Reads a `config.json` OCI runtime spec. A container is privileged when
    /// its bounding set holds `CAP_SYS_ADMIN`.
    pub fn from_oci_spec(json: &str, options: RequestOptions) -> NvcdiResult<Self> {
        let spec: OciSpec = serde_json::from_str(json)
            .change_context(NvcdiError::InvalidOption {
                message: "failed to parse OCI runtime spec".to_string(),
            })?;

        let process = spec.process.unwrap_or_default();
        let privileged = process
            .capabilities
            .is_some_and(|caps| caps.bounding.iter().any(|c| c == CAP_SYS_ADMIN));
        let mounts = spec
            .mounts
            .into_iter()
            .map(|m| RequestMount {
                source: m.source,
                destination: m.destination,
            })
            .collect();

        Ok(Self::new(options)
            .with_annotations(spec.annotations)
            .with_env(&process.env)?
            .with_mounts(mounts)
            .with_privileged(privileged))
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    /// Sets the environment from `KEY=VALUE` entries.
    pub fn with_env<S: AsRef<str>>(mut self, env: &[S]) -> NvcdiResult<Self> {
        let mut parsed = HashMap::new();
        for entry in env {
            let entry = entry.as_ref();
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                Report::new(NvcdiError::InvalidOption {
                    message: format!("invalid environment variable: {entry}"),
                })
            })?;
            parsed.insert(key.to_string(), value.to_string());
        }
        self.env = parsed;
        Ok(self)
    }

    pub fn with_mounts(mut self, mounts: Vec<RequestMount>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// The requested devices, as ids or fully-qualified CDI names.
    pub fn visible_devices(&self) -> Vec<String> {
        let from_annotations = self.devices_from_annotations();
        if !from_annotations.is_empty() {
            return from_annotations;
        }

        if self.options.accept_device_list_as_volume_mounts {
            let from_mounts = self.devices_from_mounts();
            if !from_mounts.is_empty() {
                return from_mounts;
            }
        }

        let env_vars = self.visible_env_vars();
        let from_env = self.devices_from_env(&env_vars);
        if from_env.is_empty() {
            return Vec::new();
        }
        if self.privileged || self.options.accept_envvar_unprivileged {
            return from_env;
        }
        tracing::warn!("Ignoring devices requested by environment variable(s) in unprivileged container: {env_vars:?}");
        Vec::new()
    }

    /// The requested IMEX channel ids. Annotations never carry channels.
    pub fn imex_channels(&self) -> Vec<String> {
        if self.options.ignore_imex_channel_requests {
            return Vec::new();
        }

        if self.options.accept_device_list_as_volume_mounts {
            let from_mounts: Vec<String> = self
                .requests_from_mounts()
                .into_iter()
                .filter_map(|r| r.strip_prefix(MOUNT_PREFIX_IMEX).map(str::to_string))
                .collect();
            if !from_mounts.is_empty() {
                return from_mounts;
            }
        }

        let from_env = self.devices_from_env(&[ENV_IMEX_CHANNELS.to_string()]);
        // `all` channels must be requested explicitly through a mount.
        if from_env.is_empty() || from_env == ["all"] {
            return Vec::new();
        }
        if self.privileged || self.options.accept_envvar_unprivileged {
            return from_env;
        }
        tracing::warn!("Ignoring request by environment variable(s) in unprivileged container: [{ENV_IMEX_CHANNELS}]");
        Vec::new()
    }

    /// True if every requested device is a fully-qualified CDI name.
    pub fn only_qualified_cdi_devices(&self) -> bool {
        let devices = self.visible_devices();
        !devices.is_empty() && devices.iter().all(|d| cdi::parse_qualified_name(d).is_ok())
    }

    /// Device ids to generate for a spec of `kind`. Qualified names of
    /// another kind are skipped.
    pub fn device_ids(&self, kind: &str) -> Vec<String> {
        self.visible_devices()
            .into_iter()
            .filter_map(|device| match cdi::parse_qualified_name(&device) {
                Ok((vendor, class, name)) if format!("{vendor}/{class}") == kind => Some(name),
                Ok(_) => {
                    tracing::debug!("Skipping request for {device}: not of kind {kind}");
                    None
                }
                Err(_) => Some(device),
            })
            .collect()
    }

    fn is_legacy(&self) -> bool {
        self.env.get(ENV_CUDA_VERSION).is_some_and(|v| !v.is_empty())
            && self.env.get(ENV_REQUIRE_CUDA).map_or(true, |v| v.is_empty())
    }

    fn visible_env_vars(&self) -> Vec<String> {
        let preferred: Vec<String> = self
            .options
            .preferred_visible_device_env_vars
            .iter()
            .filter(|v| self.env.contains_key(*v))
            .cloned()
            .collect();
        if preferred.is_empty() {
            vec![ENV_VISIBLE_DEVICES.to_string()]
        } else {
            preferred
        }
    }

    fn devices_from_env(&self, env_vars: &[String]) -> Vec<String> {
        let mut is_set = false;
        let mut devices = Vec::new();
        for var in env_vars {
            let Some(value) = self.env.get(var) else {
                continue;
            };
            is_set = true;
            devices.extend(value.split(',').map(str::trim).filter(|d| !d.is_empty()).map(str::to_string));
        }

        if !is_set && devices.is_empty() && self.is_legacy() {
            devices.push("all".to_string());
        }
        normalize(devices)
    }

    fn devices_from_annotations(&self) -> Vec<String> {
        if self.options.annotation_prefixes.is_empty() {
            return Vec::new();
        }
        // BTreeMap iteration keeps keys sorted.
        self.annotations
            .iter()
            .filter(|(key, _)| self.options.annotation_prefixes.iter().any(|p| key.starts_with(p.as_str())))
            .flat_map(|(_, value)| value.split(',').map(str::to_string))
            .collect()
    }

    fn devices_from_mounts(&self) -> Vec<String> {
        let mut devices = Vec::new();
        for request in self.requests_from_mounts() {
            if request.starts_with(MOUNT_PREFIX_IMEX) {
                continue;
            }
            if request.starts_with(MOUNT_PREFIX_CDI) {
                match cdi_mount_request(&request) {
                    Ok(name) => devices.push(name),
                    Err(e) => tracing::warn!("Ignoring invalid mount request for CDI device {request}: {e:?}"),
                }
                continue;
            }
            devices.push(request);
        }
        devices
    }

    fn requests_from_mounts(&self) -> Vec<String> {
        let root = clean(Path::new(DEVICE_LIST_AS_VOLUME_MOUNTS_ROOT));
        let mut seen = HashSet::new();
        let mut requests = Vec::new();
        for mount in &self.mounts {
            if clean(&mount.source) != Path::new("/dev/null") {
                continue;
            }
            let destination = clean(&mount.destination);
            if !seen.insert(destination.clone()) {
                continue;
            }
            let Ok(device) = destination.strip_prefix(&root) else {
                continue;
            };
            let device = device.to_string_lossy();
            let device = device.trim_matches('/');
            if !device.is_empty() {
                requests.push(device.to_string());
            }
        }
        requests
    }
}

/// `cdi/<vendor>/<class>/<name>` or `cdi/<qualified name>` to a qualified name.
fn cdi_mount_request(request: &str) -> NvcdiResult<String> {
    let invalid = || {
        Report::new(NvcdiError::InvalidIdentifier {
            id: request.to_string(),
            message: "invalid mount CDI device request".to_string(),
        })
    };
    let requested = request.strip_prefix(MOUNT_PREFIX_CDI).ok_or_else(invalid)?;
    if cdi::parse_qualified_name(requested).is_ok() {
        return Ok(requested.to_string());
    }
    let mut parts = requested.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(vendor), Some(class), Some(name)) => Ok(cdi::qualified_name(vendor, class, name)),
        _ => Err(invalid()),
    }
}

/// `all` and `none` override any other entry; an empty list or `void`
/// requests nothing.
fn normalize(devices: Vec<String>) -> Vec<String> {
    if devices.iter().any(|d| d == "void") {
        return Vec::new();
    }
    for special in ["all", "none"] {
        if devices.iter().any(|d| d == special) {
            return vec![special.to_string()];
        }
    }
    let mut seen = HashSet::new();
    devices.into_iter().filter(|d| seen.insert(d.clone())).collect()
}

fn clean(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn dev_null(destination: &str) -> RequestMount {
        RequestMount {
            source: PathBuf::from("/dev/null"),
            destination: PathBuf::from(destination),
        }
    }

    fn request(options: RequestOptions, env: &[&str]) -> ContainerRequest {
        ContainerRequest::new(options).with_env(env).unwrap()
    }

    #[test]
    fn annotations_win_over_mounts_and_env() {
        let options = RequestOptions {
            annotation_prefixes: vec!["cdi.k8s.io/".to_string()],
            accept_device_list_as_volume_mounts: true,
            ..Default::default()
        };
        let annotations = BTreeMap::from([
            ("cdi.k8s.io/b".to_string(), "nvidia.com/gpu=1".to_string()),
            ("cdi.k8s.io/a".to_string(), "nvidia.com/gpu=0".to_string()),
            ("other/c".to_string(), "nvidia.com/gpu=2".to_string()),
        ]);
        let request = request(options, &["NVIDIA_VISIBLE_DEVICES=3"])
            .with_annotations(annotations)
            .with_mounts(vec![dev_null("/var/run/nvidia-container-devices/4")]);

        assert_eq!(request.visible_devices(), vec!["nvidia.com/gpu=0", "nvidia.com/gpu=1"]);
        assert!(request.only_qualified_cdi_devices());
    }

    #[test]
    fn mounts_win_over_env() {
        let options = RequestOptions {
            accept_device_list_as_volume_mounts: true,
            ..Default::default()
        };
        let request = request(options, &["NVIDIA_VISIBLE_DEVICES=3"]).with_mounts(vec![
            dev_null("/var/run/nvidia-container-devices/0"),
            dev_null("/var/run/nvidia-container-devices/./0"),
            dev_null("/var/run/nvidia-container-devices/cdi/nvidia.com/gpu/1"),
            dev_null("/var/run/nvidia-container-devices/imex/5"),
            dev_null("/elsewhere/2"),
            RequestMount {
                source: PathBuf::from("/tmp/file"),
                destination: PathBuf::from("/var/run/nvidia-container-devices/6"),
            },
        ]);

        assert_eq!(request.visible_devices(), vec!["0", "nvidia.com/gpu=1"]);
        assert_eq!(request.imex_channels(), vec!["5"]);
    }

    #[test]
    fn mounts_are_ignored_unless_accepted() {
        let request = request(RequestOptions::default(), &["NVIDIA_VISIBLE_DEVICES=3"])
            .with_mounts(vec![dev_null("/var/run/nvidia-container-devices/0")]);
        assert_eq!(request.visible_devices(), vec!["3"]);
    }

    #[test]
    fn env_requires_privilege_unless_accepted() {
        let strict = RequestOptions {
            accept_envvar_unprivileged: false,
            ..Default::default()
        };
        let env = ["NVIDIA_VISIBLE_DEVICES=0,1", "NVIDIA_IMEX_CHANNELS=2"];

        let unprivileged = request(strict.clone(), &env);
        assert_eq!(unprivileged.visible_devices(), Vec::<String>::new());
        assert_eq!(unprivileged.imex_channels(), Vec::<String>::new());

        let privileged = request(strict, &env).with_privileged(true);
        assert_eq!(privileged.visible_devices(), vec!["0", "1"]);
        assert_eq!(privileged.imex_channels(), vec!["2"]);

        let accepted = request(RequestOptions::default(), &env);
        assert_eq!(accepted.visible_devices(), vec!["0", "1"]);
    }

    #[test]
    fn special_values() {
        let options = RequestOptions::default();
        assert_eq!(request(options.clone(), &["NVIDIA_VISIBLE_DEVICES=0,all"]).visible_devices(), vec!["all"]);
        assert_eq!(request(options.clone(), &["NVIDIA_VISIBLE_DEVICES=none"]).visible_devices(), vec!["none"]);
        assert!(request(options.clone(), &["NVIDIA_VISIBLE_DEVICES=0,void"]).visible_devices().is_empty());
        assert!(request(options.clone(), &["NVIDIA_VISIBLE_DEVICES="]).visible_devices().is_empty());
        assert!(request(options.clone(), &["NVIDIA_IMEX_CHANNELS=all"]).imex_channels().is_empty());
        assert_eq!(request(options, &["NVIDIA_VISIBLE_DEVICES= 1 , 1,2"]).visible_devices(), vec!["1", "2"]);
    }

    #[test]
    fn legacy_images_get_all_devices() {
        let options = RequestOptions::default();
        assert_eq!(request(options.clone(), &["CUDA_VERSION=9.0"]).visible_devices(), vec!["all"]);
        assert!(request(options.clone(), &["CUDA_VERSION=9.0", "NVIDIA_REQUIRE_CUDA=cuda>=9.0"])
            .visible_devices()
            .is_empty());
        assert!(request(options, &[] as &[&str]).visible_devices().is_empty());
    }

    #[test]
    fn preferred_env_vars() {
        let options = RequestOptions {
            preferred_visible_device_env_vars: vec!["DOCKER_RESOURCE_GPU".to_string()],
            ..Default::default()
        };
        let env = ["NVIDIA_VISIBLE_DEVICES=all", "DOCKER_RESOURCE_GPU=1"];
        assert_eq!(request(options.clone(), &env).visible_devices(), vec!["1"]);
        assert_eq!(request(options, &env[..1]).visible_devices(), vec!["all"]);
    }

    #[test]
    fn device_ids_for_kind() {
        let request = request(RequestOptions::default(), &["NVIDIA_VISIBLE_DEVICES=nvidia.com/gpu=0,other.com/x=1,2"]);
        assert_eq!(request.device_ids("nvidia.com/gpu"), vec!["0", "2"]);
        assert!(!request.only_qualified_cdi_devices());
    }

    #[test]
    fn rejects_malformed_env() {
        assert!(ContainerRequest::default().with_env(&["NO_EQUALS"]).is_err());
    }

    #[test]
    fn parses_oci_spec() {
        let json = r#"{
            "ociVersion": "1.0.2",
            "process": {
                "env": ["PATH=/usr/bin", "NVIDIA_VISIBLE_DEVICES=1"],
                "capabilities": {"bounding": ["CAP_CHOWN", "CAP_SYS_ADMIN"]}
            },
            "mounts": [{"destination": "/proc", "type": "proc", "source": "proc"}]
        }"#;
        let options = RequestOptions {
            accept_envvar_unprivileged: false,
            ..Default::default()
        };
        let request = ContainerRequest::from_oci_spec(json, options.clone()).unwrap();
        assert!(request.is_privileged());
        assert_eq!(request.visible_devices(), vec!["1"]);

        let unprivileged = ContainerRequest::from_oci_spec(r#"{"process": {"env": ["NVIDIA_VISIBLE_DEVICES=1"]}}"#, options).unwrap();
        assert!(!unprivileged.is_privileged());
        assert!(unprivileged.visible_devices().is_empty());

        assert!(ContainerRequest::from_oci_spec("not json", RequestOptions::default()).is_err());
    }
}
