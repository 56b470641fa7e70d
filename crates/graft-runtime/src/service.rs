use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use graft_host_api::{
    Capability, CodeSources, Context, DescriptorProvider, FatalErrorHandler, HostRuntime,
    ModuleDescriptor, ResourceSources,
};

use crate::bridge::LifecycleBridge;
use crate::components::ProviderBinding;
use crate::context::{ModuleContext, PrivilegedLookup};
use crate::error::{Error, Result};
use crate::events::ModuleSignal;
use crate::load;
use crate::model::{
    LoadedModule, ModuleInfo, StepStatus, TeardownReport, TeardownStep, TeardownStepOutcome,
};
use crate::patch;
use crate::state::{RuntimeOptions, RuntimeState};

/// Lifecycle orchestrator: loads plugin modules into the process, owns the
/// registry of running modules, and tears them down best-effort. Created
/// once at process start and passed around by handle; constructing it
/// installs the host-slot interception.
pub struct ModuleRuntimeService {
    state: Arc<RuntimeState>,
    descriptors: Arc<dyn DescriptorProvider>,
    resource_sources: Arc<dyn ResourceSources>,
    code_sources: Arc<dyn CodeSources>,
}

/// Reinstalls the captured fatal handler on drop. Modules may swap the
/// handler during startup; the host's own must win afterwards.
struct FatalRestore<'a> {
    host: &'a Arc<dyn HostRuntime>,
    captured: Arc<dyn FatalErrorHandler>,
}

impl Drop for FatalRestore<'_> {
    fn drop(&mut self) {
        self.host.install_fatal_handler(self.captured.clone());
    }
}

impl ModuleRuntimeService {
    pub fn new(
        host: Arc<dyn HostRuntime>,
        descriptors: Arc<dyn DescriptorProvider>,
        resource_sources: Arc<dyn ResourceSources>,
        code_sources: Arc<dyn CodeSources>,
    ) -> Arc<Self> {
        Self::with_options(
            host,
            descriptors,
            resource_sources,
            code_sources,
            RuntimeOptions::default(),
        )
    }

    pub fn with_options(
        host: Arc<dyn HostRuntime>,
        descriptors: Arc<dyn DescriptorProvider>,
        resource_sources: Arc<dyn ResourceSources>,
        code_sources: Arc<dyn CodeSources>,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        let state = RuntimeState::new(host, options);
        patch::ensure_installed(&state);
        Arc::new(Self {
            state,
            descriptors,
            resource_sources,
            code_sources,
        })
    }

    /// Start a module by package id, resolving its descriptor through the
    /// provider.
    pub fn start_module_by_id(&self, package_id: &str) -> Result<Arc<LoadedModule>> {
        let Some(descriptor) = self.descriptors.descriptor(package_id) else {
            return Err(Error::descriptor_missing(package_id));
        };
        self.start_module(&descriptor)
    }

    /// Load and register a module. Idempotent: a package id that is already
    /// running returns the existing instance untouched.
    pub fn start_module(&self, descriptor: &ModuleDescriptor) -> Result<Arc<LoadedModule>> {
        if descriptor.package_id.trim().is_empty() {
            return Err(Error::invalid_input("module package id is empty"));
        }
        let started = Instant::now();

        let module = {
            let mut modules = self.state.modules.lock();
            if let Some(existing) = modules.get(&descriptor.package_id) {
                debug!(
                    package_id = descriptor.package_id.as_str(),
                    "module already running"
                );
                return Ok(existing.clone());
            }

            let phase = Instant::now();
            let (resources, degraded) = load::build_resource_view(
                descriptor,
                &self.resource_sources,
                self.state.host.resources(),
                self.state.options.resource_policy,
            )?;
            let resources_ms = phase.elapsed().as_millis() as u64;

            let phase = Instant::now();
            let (loader, widened) = load::build_code_loader(
                descriptor,
                &self.code_sources,
                &modules,
                self.state.host.base_context().code_loader(),
            )?;
            let loader_ms = phase.elapsed().as_millis() as u64;

            let phase = Instant::now();
            let context = Arc::new(ModuleContext::new(
                descriptor.package_id.clone(),
                resources.clone(),
                loader.clone(),
                widened,
                self.state.host.base_context(),
                self.state.host.message_hub(),
                descriptor.app_theme,
            ));
            let context_ms = phase.elapsed().as_millis() as u64;

            let module = Arc::new(LoadedModule::new(descriptor, resources, loader, context));
            modules.insert(descriptor.package_id.clone(), module.clone());
            // Providers must resolve before any module code runs.
            self.state.components.register_providers(descriptor);
            debug!(
                package_id = descriptor.package_id.as_str(),
                resources_ms, loader_ms, context_ms, degraded, "module registered"
            );
            module
        };

        // Delegate construction never runs under the registry lock; module
        // code may re-enter the runtime.
        if let Err(error) = self.construct_delegate(descriptor, &module) {
            warn!(
                package_id = descriptor.package_id.as_str(),
                error = %error,
                "delegate construction failed, unwinding registration"
            );
            if let Err(unwind_error) = self.stop_module(&descriptor.package_id) {
                warn!(
                    package_id = descriptor.package_id.as_str(),
                    error = %unwind_error,
                    "unwind after failed delegate construction also failed"
                );
            }
            return Err(error);
        }

        self.state.components.register_components(descriptor);
        info!(
            package_id = descriptor.package_id.as_str(),
            version = descriptor.version.as_str(),
            components = descriptor.components.len(),
            total_ms = started.elapsed().as_millis() as u64,
            "module started"
        );
        Ok(module)
    }

    fn construct_delegate(
        &self,
        descriptor: &ModuleDescriptor,
        module: &Arc<LoadedModule>,
    ) -> Result<()> {
        let Some(class_name) = descriptor.declared_delegate() else {
            debug!(
                package_id = descriptor.package_id.as_str(),
                "module declares no delegate"
            );
            return Ok(());
        };
        let phase = Instant::now();
        let host = &self.state.host;
        let captured = host.fatal_handler();
        let _restore_fatal = FatalRestore { host, captured };

        let context = module.context();
        let _privileged = PrivilegedLookup::new(context.clone());
        let loader = context.code_loader();
        let mut delegate = host
            .dispatch_delegate()
            .instantiate_delegate(&loader, class_name)
            .map_err(|source| Error::code_load(&descriptor.package_id, source))?;

        let context_dyn: Arc<dyn Context> = context.clone();
        delegate.on_create(context_dyn).map_err(|reason| {
            Error::delegate_construction(&descriptor.package_id, class_name, reason)
        })?;
        module.set_delegate(delegate);

        if host.capabilities().supports(Capability::LifecycleBridge) {
            module
                .lifecycle()
                .register(Arc::new(LifecycleBridge::new(host.lifecycle_listeners())));
        }
        debug!(
            package_id = descriptor.package_id.as_str(),
            class_name,
            delegate_ms = phase.elapsed().as_millis() as u64,
            "module delegate ready"
        );
        Ok(())
    }

    /// Tear a module down. Every step is best-effort: failures are recorded
    /// in the report and logged, never raised, and the final deregistration
    /// is always reached. Fails only when the module is not running.
    pub fn stop_module(&self, package_id: &str) -> Result<TeardownReport> {
        let started = Instant::now();
        let mut modules = self.state.modules.lock();
        let Some(module) = modules.get(package_id).cloned() else {
            return Err(Error::module_not_running(package_id));
        };
        info!(package_id, "stopping module");

        let mut steps: Vec<TeardownStepOutcome> = Vec::with_capacity(7);
        let mut record = |step: TeardownStep, result: anyhow::Result<usize>| match result {
            Ok(released) => {
                debug!(package_id, step = ?step, released, "teardown step complete");
                steps.push(TeardownStepOutcome {
                    step,
                    status: StepStatus::Done,
                    released,
                });
            }
            Err(error) => {
                warn!(package_id, step = ?step, error = %error, "teardown step failed");
                steps.push(TeardownStepOutcome {
                    step,
                    status: StepStatus::Failed(error.to_string()),
                    released: 0,
                });
            }
        };

        let views = self.state.host.embedded_views();
        self.state.host.post_to_dispatch_thread(Box::new(move || {
            if let Err(error) = views.detach_to_host() {
                warn!(error = %error, "embedded view detach failed");
            }
        }));
        record(TeardownStep::DetachEmbeddedViews, Ok(0));

        record(
            TeardownStep::DeregisterTaskDeclarations,
            self.state.host.task_host().deregister_declarations(package_id),
        );

        let delivered = self.state.signals.broadcast_unloading(package_id);
        record(TeardownStep::BroadcastUnloading, Ok(delivered));

        let loader_tag = module.code_loader().tag().to_string();
        let dropped = self
            .state
            .host
            .message_hub()
            .drop_subscriptions_owned_by(&loader_tag);
        record(TeardownStep::DropHubSubscriptions, Ok(dropped));

        record(
            TeardownStep::StopOwnedTasks,
            self.state.host.task_host().stop_tasks_owned_by(&loader_tag),
        );

        record(
            TeardownStep::ReleaseContextSubscriptions,
            Ok(module.context().release_subscriptions()),
        );

        let removed = self.state.components.deregister_module(package_id);
        modules.remove(package_id);
        record(TeardownStep::Deregister, Ok(removed));
        drop(modules);

        let report = TeardownReport {
            package_id: package_id.to_string(),
            steps,
            total_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            package_id,
            failed_steps = report.failed_steps(),
            total_ms = report.total_ms,
            "module stopped"
        );
        Ok(report)
    }

    pub fn running_module(&self, package_id: &str) -> Option<Arc<LoadedModule>> {
        self.state.module(package_id)
    }

    pub fn is_running(&self, package_id: &str) -> bool {
        self.state.modules.lock().contains_key(package_id)
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.modules.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn module_infos(&self) -> Vec<ModuleInfo> {
        let mut infos: Vec<ModuleInfo> = self
            .state
            .modules
            .lock()
            .values()
            .map(|module| module.info())
            .collect();
        infos.sort_by(|a, b| a.package_id.cmp(&b.package_id));
        infos
    }

    /// Per-package teardown signal feed.
    pub fn subscribe_teardown(&self, package_id: &str) -> Receiver<ModuleSignal> {
        self.state.signals.subscribe(package_id)
    }

    pub fn resolve_provider(&self, authority: &str) -> Option<ProviderBinding> {
        self.state.components.resolve_provider(authority)
    }

    /// Report whether every host slot still holds the runtime's wrapper,
    /// without repairing.
    pub fn verify_interception(&self) -> Result<()> {
        patch::verify_installed(&self.state)
    }
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
