use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;

use graft_host_api::{HostRuntime, LifecycleStage};

use crate::components::ComponentTable;
use crate::events::ModuleSignalBus;
use crate::model::LoadedModule;

/// How a failed module resource-view build is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceFailurePolicy {
    /// Abort the module start.
    #[default]
    FailFast,
    /// Log and continue with the host view.
    Degrade,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub resource_policy: ResourceFailurePolicy,
    /// Re-verify (and repair) the host slots before every component launch.
    pub repair_on_attach: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            resource_policy: ResourceFailurePolicy::default(),
            repair_on_attach: true,
        }
    }
}

/// State shared between the service and the installed interceptors. The
/// interceptors hold it weakly; once the runtime is gone they degrade to
/// pure forwarding.
pub(crate) struct RuntimeState {
    pub host: Arc<dyn HostRuntime>,
    pub options: RuntimeOptions,
    pub modules: Mutex<HashMap<String, Arc<LoadedModule>>>,
    pub components: ComponentTable,
    pub signals: ModuleSignalBus,
    pub interception_installed: AtomicBool,
}

impl RuntimeState {
    pub fn new(host: Arc<dyn HostRuntime>, options: RuntimeOptions) -> Arc<Self> {
        Arc::new(Self {
            host,
            options,
            modules: Mutex::new(HashMap::new()),
            components: ComponentTable::new(),
            signals: ModuleSignalBus::new(),
            interception_installed: AtomicBool::new(false),
        })
    }

    pub fn module(&self, package_id: &str) -> Option<Arc<LoadedModule>> {
        self.modules.lock().get(package_id).cloned()
    }

    pub fn notify_stage(&self, package_id: &str, stage: LifecycleStage, class_name: &str) {
        if let Some(module) = self.module(package_id) {
            module.lifecycle().notify(stage, package_id, class_name);
        }
    }
}
