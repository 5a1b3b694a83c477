use core::error::Error;

use error_stack::Report;

/// Errors raised while generating CDI specifications.
#[derive(Debug, derive_more::Display)]
pub enum NvcdiError {
    #[display("invalid mode: {mode}")]
    InvalidMode { mode: String },
    #[display("invalid device identifier {id:?}: {message}")]
    InvalidIdentifier { id: String, message: String },
    #[display("unsupported device id {id:?}: {message}")]
    UnsupportedDevice { id: String, message: String },
    #[display("NVML error: {message}")]
    Nvml { message: String },
    #[display("failed to look up {pattern:?}: {message}")]
    Lookup { pattern: String, message: String },
    #[display("failed to discover {kind}: {message}")]
    Discovery { kind: String, message: String },
    #[display("invalid CDI spec: {message}")]
    InvalidSpec { message: String },
    #[display("invalid option: {message}")]
    InvalidOption { message: String },
    #[display("I/O error: {message}")]
    Io { message: String },
}

impl Error for NvcdiError {}

pub type NvcdiResult<T> = Result<T, Report<NvcdiError>>;

impl NvcdiError {
    pub(crate) fn nvml(message: impl Into<String>) -> Self {
        Self::Nvml {
            message: message.into(),
        }
    }

    pub(crate) fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub(crate) fn spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    pub(crate) fn discovery(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
