//! In-place rewrites of a generated CDI spec.

mod dedupe;
mod merged_device;
mod root;
mod simplify;
mod sort;

use crate::cdi;
use crate::error::NvcdiResult;

pub use dedupe::Dedupe;
pub use merged_device::MergedDevice;
pub use root::driver_root_transformer;
pub use root::RootTransformer;
pub use simplify::Simplifier;
pub use sort::Sorter;

/// A rewrite of a spec.
pub trait Transform {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()>;
}

/// Applies transforms in order, stopping at the first error.
impl Transform for [Box<dyn Transform>] {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()> {
        for t in self {
            t.transform(spec)?;
        }
        Ok(())
    }
}

/// Every set of edits of a spec: the spec-level edits first.
fn all_edits_mut(spec: &mut cdi::Spec) -> impl Iterator<Item = &mut cdi::ContainerEdits> {
    std::iter::once(&mut spec.container_edits).chain(spec.devices.iter_mut().map(|d| &mut d.container_edits))
}
