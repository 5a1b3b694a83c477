use std::path::Path;

use error_stack::Report;

use super::all_edits_mut;
use super::Transform;
use crate::cdi;
use crate::error::NvcdiError;
use crate::error::NvcdiResult;

/// Rewrites host paths below `root` to lie below `target_root` instead, for
/// specs generated from a mounted view of the host filesystem.
#[derive(Debug, Clone)]
pub struct RootTransformer {
    root: String,
    target_root: String,
}

impl RootTransformer {
    pub fn new(root: impl Into<String>, target_root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            target_root: target_root.into(),
        }
    }

    fn path(&self, path: &str) -> String {
        match path.strip_prefix(&self.root) {
            Some(rest) => Path::new(&self.target_root)
                .join(rest.trim_start_matches('/'))
                .to_string_lossy()
                .into_owned(),
            None => path.to_string(),
        }
    }

    /// Hook arguments are either paths or `target::link` pairs.
    fn arg(&self, arg: &str) -> NvcdiResult<String> {
        let parts: Vec<&str> = arg.split("::").collect();
        match parts.as_slice() {
            [path] => Ok(self.path(path)),
            [target, link] => Ok(format!("{}::{}", self.path(target), self.path(link))),
            _ => Err(Report::new(NvcdiError::spec(format!(
                "unexpected number of '::' separators in hook argument {arg:?}"
            )))),
        }
    }

    fn edits(&self, edits: &mut cdi::ContainerEdits) -> NvcdiResult<()> {
        for node in &mut edits.device_nodes {
            if let Some(host_path) = &node.host_path {
                node.host_path = Some(self.path(host_path));
            }
        }
        for hook in &mut edits.hooks {
            hook.path = self.path(&hook.path);
            hook.args = hook
                .args
                .iter()
                .map(|a| self.arg(a))
                .collect::<NvcdiResult<_>>()?;
        }
        for mount in &mut edits.mounts {
            mount.host_path = self.path(&mount.host_path);
        }
        Ok(())
    }
}

impl Transform for RootTransformer {
    fn transform(&self, spec: &mut cdi::Spec) -> NvcdiResult<()> {
        if self.root == self.target_root {
            return Ok(());
        }
        for edits in all_edits_mut(spec) {
            self.edits(edits)?;
        }
        Ok(())
    }
}

/// Moves a spec generated against `driver_root` and `dev_root` to the
/// target roots. The dev root follows the driver root unless given.
pub fn driver_root_transformer(
    driver_root: &Path,
    target_driver_root: &Path,
    dev_root: Option<&Path>,
    target_dev_root: Option<&Path>,
) -> Vec<Box<dyn Transform>> {
    let dev_root = dev_root.unwrap_or(driver_root);
    let target_dev_root = target_dev_root.unwrap_or(target_driver_root);

    let mut transformers: Vec<Box<dyn Transform>> = Vec::new();
    if target_dev_root != target_driver_root {
        transformers.push(Box::new(RootTransformer::new(
            ensure_dev(dev_root),
            ensure_dev(target_dev_root),
        )));
    }
    transformers.push(Box::new(RootTransformer::new(
        driver_root.to_string_lossy(),
        target_driver_root.to_string_lossy(),
    )));
    transformers
}

fn ensure_dev(root: &Path) -> String {
    let root = if root.ends_with("dev") {
        root.parent().unwrap_or(root)
    } else {
        root
    };
    root.join("dev").to_string_lossy().into_owned()
}
