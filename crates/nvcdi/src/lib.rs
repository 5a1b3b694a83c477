//! Generation of Container Device Interface (CDI) specs for NVIDIA devices.
//!
//! [`Library`] resolves the discovery mode for the host, turns requested
//! device identifiers into CDI devices and assembles them with the edits
//! shared by every device into a [`Spec`].

pub mod cdi;
mod discover;
mod edits;
pub mod error;
mod factory;
mod generator;
mod identifier;
mod inventory;
mod lookup;
pub mod mode;
pub mod namer;
mod nvcaps;
pub mod nvml;
pub mod options;
pub mod platform;
pub mod requests;
pub mod spec;
mod tegra;
pub mod transform;
mod wrapper;

#[cfg(test)]
mod test_support;

pub use discover::HookName;
pub use error::NvcdiError;
pub use error::NvcdiResult;
pub use mode::Mode;
pub use namer::DeviceNamer;
pub use options::FeatureFlag;
pub use options::MergedDeviceOptions;
pub use options::Options;
pub use requests::ContainerRequest;
pub use requests::RequestOptions;
pub use spec::Format;
pub use spec::Spec;
pub use wrapper::Library;
