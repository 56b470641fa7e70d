use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::descriptor::ResourceId;

#[derive(Debug, Error)]
pub enum ResourceLoadError {
    #[error("resource bundle missing at `{path}`")]
    BundleMissing { path: PathBuf },
    #[error("resource bundle at `{path}` unreadable: {details}")]
    BundleUnreadable { path: PathBuf, details: String },
}

/// Read side of one resource table, module-scoped or the host's own.
pub trait ResourceView: Send + Sync {
    fn contains(&self, id: ResourceId) -> bool;
    /// Resolve an identifier to its raw value, if present.
    fn lookup(&self, id: ResourceId) -> Option<String>;
}

/// Builds per-module resource views. Merging shared or framework
/// identifiers from the host table happens behind this seam.
pub trait ResourceSources: Send + Sync {
    fn build_view(
        &self,
        installed_path: &Path,
        host: Arc<dyn ResourceView>,
    ) -> Result<Arc<dyn ResourceView>, ResourceLoadError>;
}
