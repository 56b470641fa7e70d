use graft_host_api::{CodeLoadError, ResourceLoadError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("no descriptor registered for module `{package_id}`")]
    DescriptorMissing { package_id: String },
    #[error("module not running: `{package_id}`")]
    ModuleNotRunning { package_id: String },
    #[error("resource view for module `{package_id}` failed: {source}")]
    ResourceLoad {
        package_id: String,
        #[source]
        source: ResourceLoadError,
    },
    #[error("code loader for module `{package_id}` failed: {source}")]
    CodeLoad {
        package_id: String,
        #[source]
        source: CodeLoadError,
    },
    #[error("delegate `{class_name}` of module `{package_id}` failed to initialize: {reason}")]
    DelegateConstruction {
        package_id: String,
        class_name: String,
        reason: anyhow::Error,
    },
    #[error("host {slot} slot no longer holds the runtime interceptor")]
    InterceptionLost { slot: &'static str },
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn descriptor_missing(package_id: impl Into<String>) -> Self {
        Self::DescriptorMissing {
            package_id: package_id.into(),
        }
    }

    pub fn module_not_running(package_id: impl Into<String>) -> Self {
        Self::ModuleNotRunning {
            package_id: package_id.into(),
        }
    }

    pub fn resource_load(package_id: impl Into<String>, source: ResourceLoadError) -> Self {
        Self::ResourceLoad {
            package_id: package_id.into(),
            source,
        }
    }

    pub fn code_load(package_id: impl Into<String>, source: CodeLoadError) -> Self {
        Self::CodeLoad {
            package_id: package_id.into(),
            source,
        }
    }

    pub fn delegate_construction(
        package_id: impl Into<String>,
        class_name: impl Into<String>,
        reason: anyhow::Error,
    ) -> Self {
        Self::DelegateConstruction {
            package_id: package_id.into(),
            class_name: class_name.into(),
            reason,
        }
    }

    pub fn interception_lost(slot: &'static str) -> Self {
        Self::InterceptionLost { slot }
    }
}
