use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use graft_host_api::{
    CodeLoadError, CodeLoader, ComponentInstance, ComponentShell, ComponentTarget,
    DispatchDelegate, LifecycleStage, LoopMessage, MessageLoopHook, ModuleDelegate,
};

use crate::context::ContextInterceptor;
use crate::error::{Error, Result};
use crate::remap::{self, RemapOutcome};
use crate::state::RuntimeState;

pub(crate) const DISPATCH_SLOT: &str = "dispatch delegate";
pub(crate) const CONTEXT_SLOT: &str = "base context";
pub(crate) const LOOP_SLOT: &str = "message loop";

/// Wrapper around the host's process-wide dispatcher. Forwards everything;
/// reinterprets instantiation and attach for targets bound to a plugin
/// module.
pub struct DispatchInterceptor {
    inner: Arc<dyn DispatchDelegate>,
    state: Weak<RuntimeState>,
}

impl DispatchDelegate for DispatchInterceptor {
    fn instantiate(
        &self,
        loader: &Arc<dyn CodeLoader>,
        target: &ComponentTarget,
    ) -> std::result::Result<Box<dyn ComponentInstance>, CodeLoadError> {
        let Some(state) = self.state.upgrade() else {
            return self.inner.instantiate(loader, target);
        };
        let real_class = target.real_class();
        let Some(binding) = state.components.lookup(real_class) else {
            return self.inner.instantiate(loader, target);
        };
        let Some(module) = state.module(&binding.package_id) else {
            warn!(
                class_name = real_class,
                package_id = binding.package_id.as_str(),
                "component binding without a running module"
            );
            return self.inner.instantiate(loader, target);
        };
        debug!(
            class_name = real_class,
            package_id = binding.package_id.as_str(),
            "instantiating plugin component"
        );
        let mut retargeted = target.clone();
        retargeted.class_name = real_class.to_string();
        self.inner.instantiate(&module.code_loader(), &retargeted)
    }

    fn instantiate_delegate(
        &self,
        loader: &Arc<dyn CodeLoader>,
        class_name: &str,
    ) -> std::result::Result<Box<dyn ModuleDelegate>, CodeLoadError> {
        self.inner.instantiate_delegate(loader, class_name)
    }

    fn call_create(
        &self,
        instance: &mut dyn ComponentInstance,
        shell: &mut dyn ComponentShell,
    ) -> anyhow::Result<()> {
        let Some(state) = self.state.upgrade() else {
            return self.inner.call_create(instance, shell);
        };
        let outcome = remap::remap_component(&state, shell);
        self.inner.call_create(instance, shell)?;
        if let RemapOutcome::Plugin {
            package_id,
            class_name,
        } = outcome
        {
            state.notify_stage(&package_id, LifecycleStage::Created, &class_name);
        }
        Ok(())
    }

    fn call_stage(
        &self,
        instance: &mut dyn ComponentInstance,
        stage: LifecycleStage,
    ) -> anyhow::Result<()> {
        self.inner.call_stage(instance, stage)?;
        if let Some(state) = self.state.upgrade() {
            if let Some(binding) = state.components.lookup(instance.class_name()) {
                state.notify_stage(&binding.package_id, stage, instance.class_name());
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Loop-callback layer: before each component launch it re-checks that the
/// interceptors are still installed and repairs reverted slots, then hands
/// the message to whatever hook was there before.
pub struct AttachTrace {
    prior: Option<Arc<dyn MessageLoopHook>>,
    state: Weak<RuntimeState>,
}

impl MessageLoopHook for AttachTrace {
    fn handle(&self, message: &LoopMessage) -> bool {
        if matches!(message, LoopMessage::LaunchComponent { .. }) {
            if let Some(state) = self.state.upgrade() {
                if state.options.repair_on_attach {
                    ensure_installed(&state);
                }
            }
        }
        match &self.prior {
            Some(prior) => prior.handle(message),
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Install the interception wrappers into every host slot not already
/// holding them. Idempotent; repeated calls leave a single wrapper layer.
pub(crate) fn ensure_installed(state: &Arc<RuntimeState>) {
    let previously = state.interception_installed.swap(true, Ordering::SeqCst);
    let host = &state.host;

    let dispatch = host.dispatch_delegate();
    if !dispatch.as_any().is::<DispatchInterceptor>() {
        log_install(DISPATCH_SLOT, previously);
        host.install_dispatch_delegate(Arc::new(DispatchInterceptor {
            inner: dispatch,
            state: Arc::downgrade(state),
        }));
    }

    let context = host.base_context();
    if !context.as_any().is::<ContextInterceptor>() {
        log_install(CONTEXT_SLOT, previously);
        host.install_base_context(Arc::new(ContextInterceptor::new(
            context,
            Arc::downgrade(state),
        )));
    }

    let hook_installed = host
        .loop_hook()
        .is_some_and(|hook| hook.as_any().is::<AttachTrace>());
    if !hook_installed {
        log_install(LOOP_SLOT, previously);
        host.install_loop_hook(Arc::new(AttachTrace {
            prior: host.loop_hook(),
            state: Arc::downgrade(state),
        }));
    }
}

fn log_install(slot: &'static str, previously: bool) {
    if previously {
        warn!(slot, "host slot reverted externally, reinstalling");
    } else {
        debug!(slot, "installing interceptor");
    }
}

/// Report the first externally reverted slot without repairing it.
pub(crate) fn verify_installed(state: &RuntimeState) -> Result<()> {
    let host = &state.host;
    if !host
        .dispatch_delegate()
        .as_any()
        .is::<DispatchInterceptor>()
    {
        return Err(Error::interception_lost(DISPATCH_SLOT));
    }
    if !host.base_context().as_any().is::<ContextInterceptor>() {
        return Err(Error::interception_lost(CONTEXT_SLOT));
    }
    let hook_installed = host
        .loop_hook()
        .is_some_and(|hook| hook.as_any().is::<AttachTrace>());
    if !hook_installed {
        return Err(Error::interception_lost(LOOP_SLOT));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/patch_tests.rs"]
mod tests;
