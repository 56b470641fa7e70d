use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::component::ComponentInstance;
use crate::context::Context;

#[derive(Debug, Error)]
pub enum CodeLoadError {
    #[error("code archive missing at `{path}`")]
    ArchiveMissing { path: PathBuf },
    #[error("code archive at `{path}` unreadable: {details}")]
    ArchiveUnreadable { path: PathBuf, details: String },
    #[error("class `{class_name}` not found by loader `{loader}`")]
    ClassNotFound { loader: String, class_name: String },
    #[error("class `{class_name}` is not {expected}")]
    WrongKind { class_name: String, expected: &'static str },
}

impl CodeLoadError {
    pub fn class_not_found(loader: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::ClassNotFound {
            loader: loader.into(),
            class_name: class_name.into(),
        }
    }

    pub fn wrong_kind(class_name: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongKind {
            class_name: class_name.into(),
            expected,
        }
    }
}

/// Top-level per-module object, analogous to the host's application-wide
/// singleton. Constructed at most once per loaded module.
pub trait ModuleDelegate: Send {
    /// Startup hook. Runs once, outside the registry lock, with the
    /// module's own execution context.
    fn on_create(&mut self, context: Arc<dyn Context>) -> anyhow::Result<()>;
}

/// One code-loading scope. `tag` identifies ownership for teardown sweeps;
/// the runtime tags module loaders with the package id.
pub trait CodeLoader: Send + Sync {
    fn tag(&self) -> &str;
    fn contains_class(&self, class_name: &str) -> bool;
    fn instantiate_component(
        &self,
        class_name: &str,
    ) -> Result<Box<dyn ComponentInstance>, CodeLoadError>;
    fn instantiate_delegate(
        &self,
        class_name: &str,
    ) -> Result<Box<dyn ModuleDelegate>, CodeLoadError>;
}

/// Opens leaf archives. Chaining across shards, dependencies, and the host
/// loader is the runtime's concern.
pub trait CodeSources: Send + Sync {
    fn open_archive(&self, path: &Path) -> Result<Arc<dyn CodeLoader>, CodeLoadError>;
}
