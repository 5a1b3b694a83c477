use std::fmt;
use std::str::FromStr;

use error_stack::Report;
use uuid::Uuid;

const HYPHENATED_UUID_LEN: usize = 36;

use crate::error::NvcdiError;

/// A classified device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    All,
    None,
    GpuIndex(u32),
    MigIndex { gpu: u32, mig: u32 },
    GpuUuid(String),
    MigUuid(String),
}

impl FromStr for Identifier {
    type Err = Report<NvcdiError>;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        match id {
            "all" => return Ok(Identifier::All),
            "none" => return Ok(Identifier::None),
            _ => {}
        }
        if is_gpu_uuid(id) {
            return Ok(Identifier::GpuUuid(id.to_string()));
        }
        if is_mig_uuid(id) {
            return Ok(Identifier::MigUuid(id.to_string()));
        }
        if let Ok(index) = id.parse::<u32>() {
            return Ok(Identifier::GpuIndex(index));
        }
        if let Some((gpu, mig)) = id.split_once(':') {
            if let (Ok(gpu), Ok(mig)) = (gpu.parse::<u32>(), mig.parse::<u32>()) {
                return Ok(Identifier::MigIndex { gpu, mig });
            }
        }
        Err(Report::new(NvcdiError::InvalidIdentifier {
            id: id.to_string(),
            message: "identifier is not a valid UUID or index".to_string(),
        }))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::All => write!(f, "all"),
            Identifier::None => write!(f, "none"),
            Identifier::GpuIndex(index) => write!(f, "{index}"),
            Identifier::MigIndex { gpu, mig } => write!(f, "{gpu}:{mig}"),
            Identifier::GpuUuid(uuid) | Identifier::MigUuid(uuid) => write!(f, "{uuid}"),
        }
    }
}

/// Only the 36 character hyphenated form, not braced, URN or simple UUIDs.
pub(crate) fn is_uuid(value: &str) -> bool {
    value.len() == HYPHENATED_UUID_LEN && Uuid::parse_str(value).is_ok()
}

fn is_gpu_uuid(id: &str) -> bool {
    id.strip_prefix("GPU-").is_some_and(is_uuid)
}

/// `MIG-<uuid>`, or the older `MIG-GPU-<uuid>/<gi>/<ci>` form.
fn is_mig_uuid(id: &str) -> bool {
    let Some(suffix) = id.strip_prefix("MIG-") else {
        return false;
    };
    if is_uuid(suffix) {
        return true;
    }
    let parts: Vec<&str> = suffix.split('/').collect();
    match parts.as_slice() {
        [gpu, gi, ci] => {
            is_gpu_uuid(gpu) && gi.parse::<u32>().is_ok() && ci.parse::<u32>().is_ok()
        }
        _ => false,
    }
}

/// Parses every identifier, failing on the first malformed one.
pub fn parse_identifiers<S: AsRef<str>>(ids: &[S]) -> Result<Vec<Identifier>, Report<NvcdiError>> {
    ids.iter().map(|id| id.as_ref().parse()).collect()
}
