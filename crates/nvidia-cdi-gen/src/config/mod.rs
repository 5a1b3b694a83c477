pub mod cli;
pub mod generate;
pub mod library;

pub use cli::*;
pub use generate::*;
pub use library::*;

/// Keeps the full error-stack report, attachments included.
pub fn nvcdi_error<E: std::fmt::Debug>(err: E) -> anyhow::Error {
    anyhow::anyhow!("{err:?}")
}
