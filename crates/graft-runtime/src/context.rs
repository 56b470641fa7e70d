use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use graft_host_api::{
    BroadcastMessage, CodeLoader, ComponentTarget, Context, DispatchError, MessageHub,
    MessageListener, ResourceView, SubscriptionToken, TaskRequest, ThemeId, REAL_CLASS_EXTRA,
};

use crate::state::RuntimeState;

/// Execution context of one loaded module: module-scoped resources and
/// class lookup over the host's dispatch surface. Subscriptions made
/// through it are tracked for teardown.
pub struct ModuleContext {
    package_id: String,
    resources: Arc<dyn ResourceView>,
    loader: Arc<dyn CodeLoader>,
    widened_loader: Arc<dyn CodeLoader>,
    inner: Arc<dyn Context>,
    hub: Arc<dyn MessageHub>,
    theme: AtomicU32,
    privileged: AtomicBool,
    subscriptions: Mutex<Vec<SubscriptionToken>>,
}

impl ModuleContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        package_id: String,
        resources: Arc<dyn ResourceView>,
        loader: Arc<dyn CodeLoader>,
        widened_loader: Arc<dyn CodeLoader>,
        inner: Arc<dyn Context>,
        hub: Arc<dyn MessageHub>,
        app_theme: ThemeId,
    ) -> Self {
        Self {
            package_id,
            resources,
            loader,
            widened_loader,
            inner,
            hub,
            theme: AtomicU32::new(app_theme),
            privileged: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn theme(&self) -> ThemeId {
        self.theme.load(Ordering::Relaxed)
    }

    pub fn set_theme(&self, theme: ThemeId) {
        self.theme.store(theme, Ordering::Relaxed);
    }

    pub fn tracked_subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Unsubscribe everything registered through this context. Returns how
    /// many subscriptions were still live.
    pub(crate) fn release_subscriptions(&self) -> usize {
        let tokens: Vec<SubscriptionToken> = self.subscriptions.lock().drain(..).collect();
        let mut released = 0;
        for token in tokens {
            if self.hub.unsubscribe(token) {
                released += 1;
            }
        }
        released
    }

    fn lookup_loader(&self) -> Arc<dyn CodeLoader> {
        if self.privileged.load(Ordering::Acquire) {
            self.widened_loader.clone()
        } else {
            self.loader.clone()
        }
    }
}

impl Context for ModuleContext {
    fn package_id(&self) -> &str {
        &self.package_id
    }

    fn resources(&self) -> Arc<dyn ResourceView> {
        self.resources.clone()
    }

    fn code_loader(&self) -> Arc<dyn CodeLoader> {
        self.lookup_loader()
    }

    fn launch_component(&self, target: ComponentTarget) -> Result<(), DispatchError> {
        self.inner.launch_component(target)
    }

    fn start_task(&self, mut request: TaskRequest) -> Result<(), DispatchError> {
        if request.origin.is_none() {
            request.origin = Some(self.package_id.clone());
        }
        self.inner.start_task(request)
    }

    fn broadcast(&self, mut message: BroadcastMessage) -> Result<(), DispatchError> {
        if message.origin.is_none() {
            message.origin = Some(self.package_id.clone());
        }
        self.inner.broadcast(message)
    }

    fn subscribe(&self, channel: &str, listener: Arc<dyn MessageListener>) -> SubscriptionToken {
        let token = self.hub.subscribe(channel, &self.package_id, listener);
        self.subscriptions.lock().push(token);
        token
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Construction-time privileged lookup window: while the guard lives,
/// class resolution through the context widens to the host loader even for
/// standalone modules.
pub(crate) struct PrivilegedLookup {
    context: Arc<ModuleContext>,
}

impl PrivilegedLookup {
    pub fn new(context: Arc<ModuleContext>) -> Self {
        context.privileged.store(true, Ordering::Release);
        debug!(
            package_id = context.package_id.as_str(),
            "privileged lookup enabled"
        );
        Self { context }
    }
}

impl Drop for PrivilegedLookup {
    fn drop(&mut self) {
        self.context.privileged.store(false, Ordering::Release);
        debug!(
            package_id = self.context.package_id.as_str(),
            "privileged lookup released"
        );
    }
}

/// Forwarding wrapper installed in the host's base-context slot. Reroutes
/// plugin component launches onto placeholders and stamps owning identity
/// on boundary calls; everything else passes through. Also doubles as the
/// identity marker installed on host components' own base contexts.
pub struct ContextInterceptor {
    inner: Arc<dyn Context>,
    state: Weak<RuntimeState>,
}

impl ContextInterceptor {
    pub(crate) fn new(inner: Arc<dyn Context>, state: Weak<RuntimeState>) -> Self {
        Self { inner, state }
    }

    fn rewrite_launch(&self, target: ComponentTarget) -> Result<ComponentTarget, DispatchError> {
        let Some(state) = self.state.upgrade() else {
            return Ok(target);
        };
        if target.is_rewritten() {
            return Ok(target);
        }
        let Some(binding) = state.components.lookup(&target.class_name) else {
            return Ok(target);
        };
        let mode = binding.decl.launch_mode;
        let Some(placeholder) = state.host.placeholders().select(mode) else {
            warn!(
                class_name = target.class_name.as_str(),
                ?mode,
                "no placeholder declared for plugin component"
            );
            return Err(DispatchError::PlaceholderExhausted { mode });
        };
        debug!(
            class_name = target.class_name.as_str(),
            placeholder = placeholder.as_str(),
            package_id = binding.package_id.as_str(),
            "rerouting plugin component launch"
        );
        let mut rewritten = target;
        rewritten
            .extras
            .insert(REAL_CLASS_EXTRA.to_string(), rewritten.class_name.clone());
        rewritten.class_name = placeholder;
        rewritten.package_id = Some(binding.package_id);
        Ok(rewritten)
    }
}

impl Context for ContextInterceptor {
    fn package_id(&self) -> &str {
        self.inner.package_id()
    }

    fn resources(&self) -> Arc<dyn ResourceView> {
        self.inner.resources()
    }

    fn code_loader(&self) -> Arc<dyn CodeLoader> {
        self.inner.code_loader()
    }

    fn launch_component(&self, target: ComponentTarget) -> Result<(), DispatchError> {
        let target = self.rewrite_launch(target)?;
        self.inner.launch_component(target)
    }

    fn start_task(&self, mut request: TaskRequest) -> Result<(), DispatchError> {
        if request.origin.is_none() {
            if let Some(state) = self.state.upgrade() {
                if let Some(binding) = state.components.lookup(&request.class_name) {
                    request.origin = Some(binding.package_id);
                }
            }
        }
        self.inner.start_task(request)
    }

    fn broadcast(&self, mut message: BroadcastMessage) -> Result<(), DispatchError> {
        if message.origin.is_none() {
            message.origin = Some(self.inner.package_id().to_string());
        }
        self.inner.broadcast(message)
    }

    fn subscribe(&self, channel: &str, listener: Arc<dyn MessageListener>) -> SubscriptionToken {
        self.inner.subscribe(channel, listener)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
