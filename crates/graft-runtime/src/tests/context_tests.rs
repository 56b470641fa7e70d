use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;

use graft_host_api::inprocess::{
    FixedPlaceholderPool, InProcessHost, StaticCodeLoader, StaticResourceView,
};
use graft_host_api::{
    BroadcastMessage, CodeLoader, ComponentDecl, ComponentInstance, ComponentTarget, Context,
    DispatchError, HostRuntime, LaunchMode, MessageListener, ModuleDescriptor, ResourceView,
    SubscriptionToken, TaskRequest,
};

use super::{ContextInterceptor, ModuleContext, PrivilegedLookup};
use crate::load::ChainedCodeLoader;
use crate::state::{RuntimeOptions, RuntimeState};

struct NopComponent {
    class_name: String,
}

impl NopComponent {
    fn boxed(class_name: &str) -> Box<dyn ComponentInstance> {
        Box::new(Self {
            class_name: class_name.to_string(),
        })
    }
}

impl ComponentInstance for NopComponent {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn on_create(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NullListener;

impl MessageListener for NullListener {
    fn on_message(&self, _message: &BroadcastMessage) {}
}

#[derive(Default)]
struct RecordingContext {
    launched: Mutex<Vec<ComponentTarget>>,
    tasks: Mutex<Vec<TaskRequest>>,
    messages: Mutex<Vec<BroadcastMessage>>,
}

impl Context for RecordingContext {
    fn package_id(&self) -> &str {
        "host"
    }

    fn resources(&self) -> Arc<dyn ResourceView> {
        Arc::new(StaticResourceView::new())
    }

    fn code_loader(&self) -> Arc<dyn CodeLoader> {
        Arc::new(StaticCodeLoader::new("host"))
    }

    fn launch_component(&self, target: ComponentTarget) -> Result<(), DispatchError> {
        self.launched.lock().push(target);
        Ok(())
    }

    fn start_task(&self, request: TaskRequest) -> Result<(), DispatchError> {
        self.tasks.lock().push(request);
        Ok(())
    }

    fn broadcast(&self, message: BroadcastMessage) -> Result<(), DispatchError> {
        self.messages.lock().push(message);
        Ok(())
    }

    fn subscribe(&self, _channel: &str, _listener: Arc<dyn MessageListener>) -> SubscriptionToken {
        SubscriptionToken(0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn test_host(placeholders: FixedPlaceholderPool) -> Arc<InProcessHost> {
    Arc::new(
        InProcessHost::new(
            Arc::new(StaticCodeLoader::new("host")),
            Arc::new(StaticResourceView::new()),
        )
        .with_placeholders(Arc::new(placeholders)),
    )
}

fn module_context(
    host: &Arc<InProcessHost>,
    scoped: Arc<dyn CodeLoader>,
    widened: Arc<dyn CodeLoader>,
) -> Arc<ModuleContext> {
    Arc::new(ModuleContext::new(
        "dev.test.module".to_string(),
        Arc::new(StaticResourceView::new()),
        scoped,
        widened,
        host.base_context(),
        host.message_hub(),
        0,
    ))
}

fn state_with_binding(host: &Arc<InProcessHost>, launch_mode: LaunchMode) -> Arc<RuntimeState> {
    let state = RuntimeState::new(host.clone(), RuntimeOptions::default());
    let mut descriptor =
        ModuleDescriptor::new("dev.test.module", "/modules/dev.test.module/code.gar");
    descriptor.components.insert(
        "module.Main".to_string(),
        ComponentDecl {
            launch_mode,
            ..ComponentDecl::default()
        },
    );
    state.components.register_components(&descriptor);
    state
}

#[test]
fn privileged_guard_widens_lookup_only_while_alive() {
    let host = test_host(FixedPlaceholderPool::new());
    let scoped: Arc<dyn CodeLoader> = Arc::new(
        StaticCodeLoader::new("dev.test.module")
            .with_component("module.Main", || NopComponent::boxed("module.Main")),
    );
    let helper: Arc<dyn CodeLoader> = Arc::new(
        StaticCodeLoader::new("host")
            .with_component("host.Helper", || NopComponent::boxed("host.Helper")),
    );
    let widened: Arc<dyn CodeLoader> = Arc::new(ChainedCodeLoader::new(
        "dev.test.module".to_string(),
        vec![scoped.clone(), helper],
    ));
    let context = module_context(&host, scoped, widened);

    assert!(!context.code_loader().contains_class("host.Helper"));
    {
        let _guard = PrivilegedLookup::new(context.clone());
        assert!(context.code_loader().contains_class("host.Helper"));
        assert!(context.code_loader().contains_class("module.Main"));
    }
    assert!(!context.code_loader().contains_class("host.Helper"));
}

#[test]
fn released_subscriptions_leave_the_hub() {
    let host = test_host(FixedPlaceholderPool::new());
    let loader: Arc<dyn CodeLoader> = Arc::new(StaticCodeLoader::new("dev.test.module"));
    let context = module_context(&host, loader.clone(), loader);

    context.subscribe("music", Arc::new(NullListener));
    context.subscribe("video", Arc::new(NullListener));
    assert_eq!(context.tracked_subscription_count(), 2);
    assert_eq!(host.hub().subscription_count(), 2);

    assert_eq!(context.release_subscriptions(), 2);
    assert_eq!(host.hub().subscription_count(), 0);
    assert_eq!(context.tracked_subscription_count(), 0);
    assert_eq!(context.release_subscriptions(), 0);
}

#[test]
fn module_context_stamps_its_identity_on_boundary_calls() {
    let host = test_host(FixedPlaceholderPool::new());
    let inner = Arc::new(RecordingContext::default());
    let loader: Arc<dyn CodeLoader> = Arc::new(StaticCodeLoader::new("dev.test.module"));
    let context = Arc::new(ModuleContext::new(
        "dev.test.module".to_string(),
        Arc::new(StaticResourceView::new()),
        loader.clone(),
        loader,
        inner.clone(),
        host.message_hub(),
        0,
    ));

    context
        .start_task(TaskRequest::new("module.Worker"))
        .expect("task must start");
    context
        .broadcast(BroadcastMessage::new("music", "ping"))
        .expect("broadcast must pass");

    assert_eq!(
        inner.tasks.lock()[0].origin.as_deref(),
        Some("dev.test.module")
    );
    assert_eq!(
        inner.messages.lock()[0].origin.as_deref(),
        Some("dev.test.module")
    );

    let mut stamped = TaskRequest::new("module.Worker");
    stamped.origin = Some("host".to_string());
    context.start_task(stamped).expect("task must start");
    assert_eq!(inner.tasks.lock()[1].origin.as_deref(), Some("host"));
}

#[test]
fn interceptor_reroutes_plugin_launch_onto_placeholder() {
    let host = test_host(
        FixedPlaceholderPool::new().with_slot(LaunchMode::SingleTask, "host.SlotSingleTask"),
    );
    let state = state_with_binding(&host, LaunchMode::SingleTask);
    let inner = Arc::new(RecordingContext::default());
    let interceptor = ContextInterceptor::new(inner.clone(), Arc::downgrade(&state));

    interceptor
        .launch_component(ComponentTarget::new("module.Main"))
        .expect("launch must reroute");

    let launched = inner.launched.lock();
    assert_eq!(launched[0].class_name, "host.SlotSingleTask");
    assert_eq!(launched[0].real_class(), "module.Main");
    assert!(launched[0].is_rewritten());
    assert_eq!(launched[0].package_id.as_deref(), Some("dev.test.module"));
}

#[test]
fn unknown_class_launch_passes_through_unchanged() {
    let host = test_host(FixedPlaceholderPool::new());
    let state = RuntimeState::new(host.clone(), RuntimeOptions::default());
    let inner = Arc::new(RecordingContext::default());
    let interceptor = ContextInterceptor::new(inner.clone(), Arc::downgrade(&state));

    interceptor
        .launch_component(ComponentTarget::new("host.Main"))
        .expect("host launch must pass through");

    let launched = inner.launched.lock();
    assert_eq!(launched[0].class_name, "host.Main");
    assert!(!launched[0].is_rewritten());
}

#[test]
fn launch_fails_when_no_placeholder_matches_the_mode() {
    let host =
        test_host(FixedPlaceholderPool::new().with_slot(LaunchMode::Standard, "host.SlotStandard"));
    let state = state_with_binding(&host, LaunchMode::SingleInstance);
    let inner = Arc::new(RecordingContext::default());
    let interceptor = ContextInterceptor::new(inner.clone(), Arc::downgrade(&state));

    let result = interceptor.launch_component(ComponentTarget::new("module.Main"));
    assert!(matches!(
        result,
        Err(DispatchError::PlaceholderExhausted {
            mode: LaunchMode::SingleInstance
        })
    ));
    assert!(inner.launched.lock().is_empty());
}

#[test]
fn interceptor_stamps_task_origin_for_plugin_classes() {
    let host = test_host(FixedPlaceholderPool::new());
    let state = state_with_binding(&host, LaunchMode::Standard);
    let inner = Arc::new(RecordingContext::default());
    let interceptor = ContextInterceptor::new(inner.clone(), Arc::downgrade(&state));

    interceptor
        .start_task(TaskRequest::new("module.Main"))
        .expect("task must start");
    interceptor
        .start_task(TaskRequest::new("host.Worker"))
        .expect("task must start");
    interceptor
        .broadcast(BroadcastMessage::new("music", "ping"))
        .expect("broadcast must pass");

    let tasks = inner.tasks.lock();
    assert_eq!(tasks[0].origin.as_deref(), Some("dev.test.module"));
    assert_eq!(tasks[1].origin, None);
    assert_eq!(inner.messages.lock()[0].origin.as_deref(), Some("host"));
}

#[test]
fn interceptor_forwards_untouched_after_runtime_drop() {
    let host =
        test_host(FixedPlaceholderPool::new().with_slot(LaunchMode::Standard, "host.SlotStandard"));
    let state = state_with_binding(&host, LaunchMode::Standard);
    let inner = Arc::new(RecordingContext::default());
    let interceptor = ContextInterceptor::new(inner.clone(), Arc::downgrade(&state));
    drop(state);

    interceptor
        .launch_component(ComponentTarget::new("module.Main"))
        .expect("launch must pass through");
    assert!(!inner.launched.lock()[0].is_rewritten());
}
