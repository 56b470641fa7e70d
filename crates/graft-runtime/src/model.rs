use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use graft_host_api::{CodeLoader, ModuleDelegate, ModuleDescriptor, ResourceView};

use crate::bridge::LifecycleNotifier;
use crate::context::ModuleContext;

/// One loaded module. Owned by the registry and shared strictly as
/// `Arc<LoadedModule>`; the delegate slot stays empty until construction
/// completes so re-entrant lookups resolve during startup.
pub struct LoadedModule {
    package_id: String,
    version: String,
    installed_path: PathBuf,
    standalone: bool,
    resources: Arc<dyn ResourceView>,
    code_loader: Arc<dyn CodeLoader>,
    context: Arc<ModuleContext>,
    delegate: Mutex<Option<Box<dyn ModuleDelegate>>>,
    lifecycle: LifecycleNotifier,
}

impl LoadedModule {
    pub(crate) fn new(
        descriptor: &ModuleDescriptor,
        resources: Arc<dyn ResourceView>,
        code_loader: Arc<dyn CodeLoader>,
        context: Arc<ModuleContext>,
    ) -> Self {
        Self {
            package_id: descriptor.package_id.clone(),
            version: descriptor.version.clone(),
            installed_path: descriptor.installed_path.clone(),
            standalone: descriptor.standalone,
            resources,
            code_loader,
            context,
            delegate: Mutex::new(None),
            lifecycle: LifecycleNotifier::default(),
        }
    }

    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn installed_path(&self) -> &Path {
        &self.installed_path
    }

    pub fn is_standalone(&self) -> bool {
        self.standalone
    }

    pub fn resources(&self) -> Arc<dyn ResourceView> {
        self.resources.clone()
    }

    pub fn code_loader(&self) -> Arc<dyn CodeLoader> {
        self.code_loader.clone()
    }

    pub fn context(&self) -> Arc<ModuleContext> {
        self.context.clone()
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.lock().is_some()
    }

    pub(crate) fn set_delegate(&self, delegate: Box<dyn ModuleDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    pub(crate) fn lifecycle(&self) -> &LifecycleNotifier {
        &self.lifecycle
    }

    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            package_id: self.package_id.clone(),
            version: self.version.clone(),
            installed_path: self.installed_path.clone(),
            standalone: self.standalone,
            has_delegate: self.has_delegate(),
        }
    }
}

/// Snapshot of one running module for host-side introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub package_id: String,
    pub version: String,
    pub installed_path: PathBuf,
    pub standalone: bool,
    pub has_delegate: bool,
}

/// Teardown steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownStep {
    DetachEmbeddedViews,
    DeregisterTaskDeclarations,
    BroadcastUnloading,
    DropHubSubscriptions,
    StopOwnedTasks,
    ReleaseContextSubscriptions,
    Deregister,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step ran (or was dispatched) without error.
    Done,
    /// Step failed; teardown continued with the remaining steps.
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownStepOutcome {
    pub step: TeardownStep,
    pub status: StepStatus,
    /// Items the step released or delivered (subscriptions, tasks, signals).
    pub released: usize,
}

/// Per-step record of one best-effort teardown.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    pub package_id: String,
    pub steps: Vec<TeardownStepOutcome>,
    pub total_ms: u64,
}

impl TeardownReport {
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|outcome| matches!(outcome.status, StepStatus::Failed(_)))
            .count()
    }

    pub fn step(&self, step: TeardownStep) -> Option<&TeardownStepOutcome> {
        self.steps.iter().find(|outcome| outcome.step == step)
    }
}
