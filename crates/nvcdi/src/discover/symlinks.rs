use std::sync::Arc;

use super::Discover;
use super::DiscoverRef;
use super::Hook;
use super::HookCreator;
use super::HookName;
use super::Mount;
use crate::error::NvcdiResult;

/// Derives `target::link` pairs from the mounts of an upstream discoverer.
pub type LinkFn = fn(&[Mount]) -> Vec<String>;

/// A `create-symlinks` hook whose links depend on what was mounted.
#[derive(Debug)]
pub struct CreateSymlinksHook {
    mounts: DiscoverRef,
    hook_creator: Arc<HookCreator>,
    links: LinkFn,
}

impl CreateSymlinksHook {
    pub fn new(mounts: DiscoverRef, hook_creator: Arc<HookCreator>, links: LinkFn) -> Self {
        Self {
            mounts,
            hook_creator,
            links,
        }
    }
}

impl Discover for CreateSymlinksHook {
    fn hooks(&self) -> NvcdiResult<Vec<Hook>> {
        let mounts = self.mounts.mounts()?;
        let links = (self.links)(&mounts);
        Ok(self
            .hook_creator
            .create(HookName::CreateSymlinks, &links)
            .into_iter()
            .collect())
    }
}
