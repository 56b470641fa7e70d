use std::sync::Arc;

use crate::capabilities::PlatformCapabilities;
use crate::component::ListenerRegistry;
use crate::context::{BroadcastMessage, Context, MessageListener, SubscriptionToken};
use crate::descriptor::LaunchMode;
use crate::dispatch::{DispatchDelegate, FatalErrorHandler, MessageLoopHook};
use crate::resources::ResourceView;

/// The host's fixed, enumerable set of placeholder component classes,
/// declared at install time.
pub trait PlaceholderPool: Send + Sync {
    /// Placeholder class for a launch mode, if the pool declares one.
    fn select(&self, mode: LaunchMode) -> Option<String>;
    fn is_placeholder(&self, class_name: &str) -> bool;
}

/// Process-wide publish/subscribe hub. Subscriptions carry an owner tag so
/// module teardown can sweep them.
pub trait MessageHub: Send + Sync {
    fn publish(&self, message: &BroadcastMessage);
    fn subscribe(
        &self,
        channel: &str,
        owner_tag: &str,
        listener: Arc<dyn MessageListener>,
    ) -> SubscriptionToken;
    fn unsubscribe(&self, token: SubscriptionToken) -> bool;
    fn drop_subscriptions_owned_by(&self, owner_tag: &str) -> usize;
}

/// Host-side background task registry.
pub trait TaskHost: Send + Sync {
    fn deregister_declarations(&self, package_id: &str) -> anyhow::Result<usize>;
    fn stop_tasks_owned_by(&self, loader_tag: &str) -> anyhow::Result<usize>;
}

/// Embedded-view machinery that plugin code may have claimed.
pub trait EmbeddedViewHost: Send + Sync {
    /// Rebind embedded-view ownership back to the host.
    fn detach_to_host(&self) -> anyhow::Result<()>;
}

/// Platform adapter: the host's patchable interception slots plus its fixed
/// facilities. Slots are construct-time injection points the runtime wraps;
/// installing a value atomically replaces the slot.
pub trait HostRuntime: Send + Sync {
    fn dispatch_delegate(&self) -> Arc<dyn DispatchDelegate>;
    fn install_dispatch_delegate(&self, delegate: Arc<dyn DispatchDelegate>);

    fn base_context(&self) -> Arc<dyn Context>;
    fn install_base_context(&self, context: Arc<dyn Context>);

    fn loop_hook(&self) -> Option<Arc<dyn MessageLoopHook>>;
    fn install_loop_hook(&self, hook: Arc<dyn MessageLoopHook>);

    fn fatal_handler(&self) -> Arc<dyn FatalErrorHandler>;
    fn install_fatal_handler(&self, handler: Arc<dyn FatalErrorHandler>);

    fn resources(&self) -> Arc<dyn ResourceView>;
    fn capabilities(&self) -> Arc<dyn PlatformCapabilities>;
    fn placeholders(&self) -> Arc<dyn PlaceholderPool>;
    fn lifecycle_listeners(&self) -> Arc<ListenerRegistry>;
    fn message_hub(&self) -> Arc<dyn MessageHub>;
    fn task_host(&self) -> Arc<dyn TaskHost>;
    fn embedded_views(&self) -> Arc<dyn EmbeddedViewHost>;

    /// Run `task` on the dispatch thread, fire and forget.
    fn post_to_dispatch_thread(&self, task: Box<dyn FnOnce() + Send>);
    fn is_dispatch_thread(&self) -> bool;
}
