//! Process-wide helpers shared by the workspace binaries.

pub mod logging;
pub mod version;
