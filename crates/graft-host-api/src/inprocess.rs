//! In-process reference host.
//!
//! Implements every adapter trait over plain in-memory state and executes
//! dispatch work inline on the caller thread. Embedding applications can
//! start from these types and swap pieces out; the runtime's own tests run
//! against them unchanged.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::capabilities::{FullCapabilities, PlatformCapabilities};
use crate::code::{CodeLoadError, CodeLoader, CodeSources, ModuleDelegate};
use crate::component::{
    ComponentInstance, ComponentShell, ComponentTarget, LifecycleStage, ListenerRegistry,
};
use crate::context::{
    BroadcastMessage, Context, DispatchError, MessageListener, SubscriptionToken, TaskRequest,
};
use crate::descriptor::{LaunchMode, Orientation, ResourceId, ThemeId};
use crate::dispatch::{DispatchDelegate, FatalErrorHandler, LoopMessage, MessageLoopHook};
use crate::host::{EmbeddedViewHost, HostRuntime, MessageHub, PlaceholderPool, TaskHost};
use crate::resources::{ResourceLoadError, ResourceView};

/// Resource view over a fixed identifier table, with optional fallback.
#[derive(Default)]
pub struct StaticResourceView {
    entries: HashMap<ResourceId, String>,
    fallback: Option<Arc<dyn ResourceView>>,
}

impl StaticResourceView {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(mut self, id: ResourceId, value: impl Into<String>) -> Self {
        self.entries.insert(id, value.into());
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn ResourceView>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl ResourceView for StaticResourceView {
    fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
            || self.fallback.as_ref().is_some_and(|view| view.contains(id))
    }

    fn lookup(&self, id: ResourceId) -> Option<String> {
        self.entries
            .get(&id)
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|view| view.lookup(id)))
    }
}

type ComponentFactory = Box<dyn Fn() -> Box<dyn ComponentInstance> + Send + Sync>;
type DelegateFactory = Box<dyn Fn() -> Box<dyn ModuleDelegate> + Send + Sync>;

/// Code loader over statically registered class factories. This is how a
/// pure-Rust host declares the classes a module ships without any dynamic
/// loading machinery.
pub struct StaticCodeLoader {
    tag: String,
    components: HashMap<String, ComponentFactory>,
    delegates: HashMap<String, DelegateFactory>,
}

impl StaticCodeLoader {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            components: HashMap::new(),
            delegates: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_component<F>(mut self, class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ComponentInstance> + Send + Sync + 'static,
    {
        self.components.insert(class_name.into(), Box::new(factory));
        self
    }

    #[must_use]
    pub fn with_delegate<F>(mut self, class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ModuleDelegate> + Send + Sync + 'static,
    {
        self.delegates.insert(class_name.into(), Box::new(factory));
        self
    }
}

impl CodeLoader for StaticCodeLoader {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn contains_class(&self, class_name: &str) -> bool {
        self.components.contains_key(class_name) || self.delegates.contains_key(class_name)
    }

    fn instantiate_component(
        &self,
        class_name: &str,
    ) -> Result<Box<dyn ComponentInstance>, CodeLoadError> {
        match self.components.get(class_name) {
            Some(factory) => Ok(factory()),
            None if self.delegates.contains_key(class_name) => {
                Err(CodeLoadError::wrong_kind(class_name, "a component"))
            }
            None => Err(CodeLoadError::class_not_found(&self.tag, class_name)),
        }
    }

    fn instantiate_delegate(
        &self,
        class_name: &str,
    ) -> Result<Box<dyn ModuleDelegate>, CodeLoadError> {
        match self.delegates.get(class_name) {
            Some(factory) => Ok(factory()),
            None if self.components.contains_key(class_name) => {
                Err(CodeLoadError::wrong_kind(class_name, "a module delegate"))
            }
            None => Err(CodeLoadError::class_not_found(&self.tag, class_name)),
        }
    }
}

/// Archive opener over pre-registered loaders keyed by path.
#[derive(Default)]
pub struct StaticCodeSources {
    archives: Mutex<HashMap<std::path::PathBuf, Arc<dyn CodeLoader>>>,
}

impl StaticCodeSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<std::path::PathBuf>, loader: Arc<dyn CodeLoader>) {
        self.archives.lock().insert(path.into(), loader);
    }
}

impl CodeSources for StaticCodeSources {
    fn open_archive(&self, path: &std::path::Path) -> Result<Arc<dyn CodeLoader>, CodeLoadError> {
        self.archives
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| CodeLoadError::ArchiveMissing {
                path: path.to_path_buf(),
            })
    }
}

/// Resource-source seam over pre-registered views keyed by installed path.
#[derive(Default)]
pub struct StaticResourceSources {
    views: Mutex<HashMap<std::path::PathBuf, Arc<dyn ResourceView>>>,
}

impl StaticResourceSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, path: impl Into<std::path::PathBuf>, view: Arc<dyn ResourceView>) {
        self.views.lock().insert(path.into(), view);
    }
}

impl crate::resources::ResourceSources for StaticResourceSources {
    fn build_view(
        &self,
        installed_path: &std::path::Path,
        _host: Arc<dyn ResourceView>,
    ) -> Result<Arc<dyn ResourceView>, ResourceLoadError> {
        self.views
            .lock()
            .get(installed_path)
            .cloned()
            .ok_or_else(|| ResourceLoadError::BundleMissing {
                path: installed_path.to_path_buf(),
            })
    }
}

/// Fixed placeholder set with one declared class per launch mode.
#[derive(Default)]
pub struct FixedPlaceholderPool {
    slots: HashMap<LaunchMode, String>,
}

impl FixedPlaceholderPool {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_slot(mut self, mode: LaunchMode, class_name: impl Into<String>) -> Self {
        self.slots.insert(mode, class_name.into());
        self
    }
}

impl PlaceholderPool for FixedPlaceholderPool {
    fn select(&self, mode: LaunchMode) -> Option<String> {
        self.slots.get(&mode).cloned()
    }

    fn is_placeholder(&self, class_name: &str) -> bool {
        self.slots.values().any(|class| class == class_name)
    }
}

struct HubEntry {
    channel: String,
    owner_tag: String,
    listener: Arc<dyn MessageListener>,
}

/// Process-local publish/subscribe hub.
#[derive(Default)]
pub struct InProcessHub {
    state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    next_token: u64,
    entries: HashMap<u64, HubEntry>,
}

impl InProcessHub {
    pub fn subscription_count(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl MessageHub for InProcessHub {
    fn publish(&self, message: &BroadcastMessage) {
        // Invoke outside the lock; listeners may subscribe re-entrantly.
        let matched: Vec<Arc<dyn MessageListener>> = {
            let state = self.state.lock();
            state
                .entries
                .values()
                .filter(|entry| entry.channel == message.channel)
                .map(|entry| entry.listener.clone())
                .collect()
        };
        for listener in matched {
            listener.on_message(message);
        }
    }

    fn subscribe(
        &self,
        channel: &str,
        owner_tag: &str,
        listener: Arc<dyn MessageListener>,
    ) -> SubscriptionToken {
        let mut state = self.state.lock();
        state.next_token += 1;
        let token = state.next_token;
        state.entries.insert(
            token,
            HubEntry {
                channel: channel.to_string(),
                owner_tag: owner_tag.to_string(),
                listener,
            },
        );
        SubscriptionToken(token)
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.state.lock().entries.remove(&token.0).is_some()
    }

    fn drop_subscriptions_owned_by(&self, owner_tag: &str) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.owner_tag != owner_tag);
        let dropped = before - state.entries.len();
        if dropped > 0 {
            debug!(owner_tag, dropped, "dropped hub subscriptions");
        }
        dropped
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub class_name: String,
    pub owner_tag: String,
}

/// Background-task registry with declaration and running-task bookkeeping.
#[derive(Default)]
pub struct InProcessTaskHost {
    declarations: Mutex<HashMap<String, Vec<String>>>,
    running: Mutex<Vec<TaskRecord>>,
    fail_stop_sweeps: AtomicBool,
}

impl InProcessTaskHost {
    /// Make subsequent stop sweeps fail.
    pub fn fail_stop_sweeps(&self, fail: bool) {
        self.fail_stop_sweeps.store(fail, Ordering::SeqCst);
    }

    pub fn declare(&self, package_id: &str, class_name: &str) {
        self.declarations
            .lock()
            .entry(package_id.to_string())
            .or_default()
            .push(class_name.to_string());
    }

    pub fn spawn(&self, class_name: &str, owner_tag: &str) {
        self.running.lock().push(TaskRecord {
            class_name: class_name.to_string(),
            owner_tag: owner_tag.to_string(),
        });
    }

    pub fn declaration_count(&self, package_id: &str) -> usize {
        self.declarations
            .lock()
            .get(package_id)
            .map_or(0, Vec::len)
    }

    pub fn running_tasks(&self) -> Vec<TaskRecord> {
        self.running.lock().clone()
    }
}

impl TaskHost for InProcessTaskHost {
    fn deregister_declarations(&self, package_id: &str) -> anyhow::Result<usize> {
        Ok(self
            .declarations
            .lock()
            .remove(package_id)
            .map_or(0, |declared| declared.len()))
    }

    fn stop_tasks_owned_by(&self, loader_tag: &str) -> anyhow::Result<usize> {
        if self.fail_stop_sweeps.load(Ordering::SeqCst) {
            anyhow::bail!("task host offline");
        }
        let mut running = self.running.lock();
        let before = running.len();
        running.retain(|task| task.owner_tag != loader_tag);
        Ok(before - running.len())
    }
}

/// Embedded-view ownership flag: plugin code may claim the machinery, and
/// teardown rebinds it to the host.
pub struct InProcessEmbeddedViews {
    host_owned: AtomicBool,
}

impl Default for InProcessEmbeddedViews {
    fn default() -> Self {
        Self {
            host_owned: AtomicBool::new(true),
        }
    }
}

impl InProcessEmbeddedViews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim_for_module(&self) {
        self.host_owned.store(false, Ordering::SeqCst);
    }

    pub fn is_host_owned(&self) -> bool {
        self.host_owned.load(Ordering::SeqCst)
    }
}

impl EmbeddedViewHost for InProcessEmbeddedViews {
    fn detach_to_host(&self) -> anyhow::Result<()> {
        self.host_owned.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Last-resort sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFatalHandler;

impl FatalErrorHandler for LoggingFatalHandler {
    fn on_fatal(&self, origin: &str, details: &str) {
        error!(origin, details, "fatal error reached the host handler");
    }
}

/// The host's native dispatcher: constructs through whatever loader it is
/// handed and drives lifecycle methods directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDispatchDelegate;

impl DispatchDelegate for HostDispatchDelegate {
    fn instantiate(
        &self,
        loader: &Arc<dyn CodeLoader>,
        target: &ComponentTarget,
    ) -> Result<Box<dyn ComponentInstance>, CodeLoadError> {
        loader.instantiate_component(&target.class_name)
    }

    fn instantiate_delegate(
        &self,
        loader: &Arc<dyn CodeLoader>,
        class_name: &str,
    ) -> Result<Box<dyn ModuleDelegate>, CodeLoadError> {
        loader.instantiate_delegate(class_name)
    }

    fn call_create(
        &self,
        instance: &mut dyn ComponentInstance,
        _shell: &mut dyn ComponentShell,
    ) -> anyhow::Result<()> {
        instance.on_create()
    }

    fn call_stage(
        &self,
        instance: &mut dyn ComponentInstance,
        stage: LifecycleStage,
    ) -> anyhow::Result<()> {
        instance.on_stage(stage)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The host's own base execution context.
pub struct HostBaseContext {
    package_id: String,
    resources: Arc<dyn ResourceView>,
    loader: Arc<dyn CodeLoader>,
    hub: Arc<InProcessHub>,
    tasks: Arc<InProcessTaskHost>,
    launch_queue: Arc<Mutex<VecDeque<ComponentTarget>>>,
}

impl Context for HostBaseContext {
    fn package_id(&self) -> &str {
        &self.package_id
    }

    fn resources(&self) -> Arc<dyn ResourceView> {
        self.resources.clone()
    }

    fn code_loader(&self) -> Arc<dyn CodeLoader> {
        self.loader.clone()
    }

    fn launch_component(&self, target: ComponentTarget) -> Result<(), DispatchError> {
        self.launch_queue.lock().push_back(target);
        Ok(())
    }

    fn start_task(&self, request: TaskRequest) -> Result<(), DispatchError> {
        let owner = request
            .origin
            .clone()
            .unwrap_or_else(|| self.package_id.clone());
        self.tasks.spawn(&request.class_name, &owner);
        Ok(())
    }

    fn broadcast(&self, message: BroadcastMessage) -> Result<(), DispatchError> {
        self.hub.publish(&message);
        Ok(())
    }

    fn subscribe(&self, channel: &str, listener: Arc<dyn MessageListener>) -> SubscriptionToken {
        self.hub.subscribe(channel, &self.package_id, listener)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shell with plain observable slots.
pub struct InProcessShell {
    target: ComponentTarget,
    base: Arc<dyn Context>,
    cached_resources: Option<Arc<dyn ResourceView>>,
    placeholder_theme: ThemeId,
    theme: ThemeId,
    inflater_package: Option<String>,
    branding: Option<(ResourceId, ResourceId)>,
    orientation: Option<Orientation>,
    immersive: Option<bool>,
    title: String,
}

impl InProcessShell {
    fn new(
        target: ComponentTarget,
        base: Arc<dyn Context>,
        host_resources: Arc<dyn ResourceView>,
        placeholder_theme: ThemeId,
    ) -> Self {
        Self {
            target,
            base,
            cached_resources: Some(host_resources),
            placeholder_theme,
            theme: placeholder_theme,
            inflater_package: None,
            branding: None,
            orientation: None,
            immersive: None,
            title: String::new(),
        }
    }

    pub fn theme(&self) -> ThemeId {
        self.theme
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn branding(&self) -> Option<(ResourceId, ResourceId)> {
        self.branding
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.orientation
    }

    pub fn immersive(&self) -> Option<bool> {
        self.immersive
    }

    pub fn inflater_package(&self) -> Option<&str> {
        self.inflater_package.as_deref()
    }

    pub fn has_cached_resources(&self) -> bool {
        self.cached_resources.is_some()
    }
}

impl ComponentShell for InProcessShell {
    fn target(&self) -> &ComponentTarget {
        &self.target
    }

    fn base_context(&self) -> Arc<dyn Context> {
        self.base.clone()
    }

    fn replace_base_context(&mut self, context: Arc<dyn Context>) {
        self.base = context;
    }

    fn clear_resource_cache(&mut self) {
        self.cached_resources = None;
    }

    fn placeholder_theme(&self) -> ThemeId {
        self.placeholder_theme
    }

    fn apply_theme(&mut self, theme: ThemeId) {
        self.theme = theme;
    }

    fn rebuild_inflater(&mut self, context: &Arc<dyn Context>) {
        self.inflater_package = Some(context.package_id().to_string());
    }

    fn set_window_branding(&mut self, icon: ResourceId, logo: ResourceId) {
        self.branding = Some((icon, logo));
    }

    fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = Some(orientation);
    }

    fn set_immersive(&mut self, on: bool) {
        self.immersive = Some(on);
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}

/// A component attached through the inline dispatch pump.
pub struct AttachResult {
    pub shell: InProcessShell,
    pub instance: Box<dyn ComponentInstance>,
}

pub enum LaunchOutcome {
    /// Component constructed and its create entry completed.
    Attached(AttachResult),
    InstantiateFailed(CodeLoadError),
    CreateFailed(anyhow::Error),
    /// The loop hook consumed the message.
    Consumed,
}

/// Reference host: interception slots over `RwLock`s, facilities over the
/// in-memory types above, dispatch executed inline on the caller thread.
pub struct InProcessHost {
    dispatch: RwLock<Arc<dyn DispatchDelegate>>,
    context: RwLock<Arc<dyn Context>>,
    hook: RwLock<Option<Arc<dyn MessageLoopHook>>>,
    fatal: RwLock<Arc<dyn FatalErrorHandler>>,
    raw_context: Arc<dyn Context>,
    resources: Arc<dyn ResourceView>,
    host_loader: Arc<dyn CodeLoader>,
    capabilities: Arc<dyn PlatformCapabilities>,
    placeholders: Arc<dyn PlaceholderPool>,
    placeholder_theme: ThemeId,
    listeners: Arc<ListenerRegistry>,
    hub: Arc<InProcessHub>,
    tasks: Arc<InProcessTaskHost>,
    views: Arc<InProcessEmbeddedViews>,
    launch_queue: Arc<Mutex<VecDeque<ComponentTarget>>>,
}

impl InProcessHost {
    pub fn new(host_loader: Arc<dyn CodeLoader>, host_resources: Arc<dyn ResourceView>) -> Self {
        let hub = Arc::new(InProcessHub::default());
        let tasks = Arc::new(InProcessTaskHost::default());
        let launch_queue = Arc::new(Mutex::new(VecDeque::new()));
        let raw_context: Arc<dyn Context> = Arc::new(HostBaseContext {
            package_id: "host".to_string(),
            resources: host_resources.clone(),
            loader: host_loader.clone(),
            hub: hub.clone(),
            tasks: tasks.clone(),
            launch_queue: launch_queue.clone(),
        });
        Self {
            dispatch: RwLock::new(Arc::new(HostDispatchDelegate)),
            context: RwLock::new(raw_context.clone()),
            hook: RwLock::new(None),
            fatal: RwLock::new(Arc::new(LoggingFatalHandler)),
            raw_context,
            resources: host_resources,
            host_loader,
            capabilities: Arc::new(FullCapabilities),
            placeholders: Arc::new(FixedPlaceholderPool::default()),
            placeholder_theme: 0,
            listeners: Arc::new(ListenerRegistry::new()),
            hub,
            tasks,
            views: Arc::new(InProcessEmbeddedViews::new()),
            launch_queue,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Arc<dyn PlatformCapabilities>) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_placeholders(mut self, placeholders: Arc<dyn PlaceholderPool>) -> Self {
        self.placeholders = placeholders;
        self
    }

    /// Theme the host pre-applies to placeholder-declared components.
    #[must_use]
    pub fn with_placeholder_theme(mut self, theme: ThemeId) -> Self {
        self.placeholder_theme = theme;
        self
    }

    pub fn hub(&self) -> Arc<InProcessHub> {
        self.hub.clone()
    }

    pub fn tasks(&self) -> Arc<InProcessTaskHost> {
        self.tasks.clone()
    }

    pub fn views(&self) -> Arc<InProcessEmbeddedViews> {
        self.views.clone()
    }

    pub fn pending_launches(&self) -> usize {
        self.launch_queue.lock().len()
    }

    /// Pump one queued component launch through the loop hook, the dispatch
    /// delegate, and the attach sequence, inline.
    pub fn process_next_launch(&self) -> Option<LaunchOutcome> {
        let target = self.launch_queue.lock().pop_front()?;
        let message = LoopMessage::LaunchComponent {
            target: target.clone(),
        };
        if let Some(hook) = self.loop_hook() {
            if hook.handle(&message) {
                return Some(LaunchOutcome::Consumed);
            }
        }
        let delegate = self.dispatch_delegate();
        let mut instance = match delegate.instantiate(&self.host_loader, &target) {
            Ok(instance) => instance,
            Err(error) => return Some(LaunchOutcome::InstantiateFailed(error)),
        };
        let placeholder_theme = if self.placeholders.is_placeholder(&target.class_name) {
            self.placeholder_theme
        } else {
            0
        };
        let mut shell = InProcessShell::new(
            target,
            self.raw_context.clone(),
            self.resources.clone(),
            placeholder_theme,
        );
        match delegate.call_create(instance.as_mut(), &mut shell) {
            Ok(()) => Some(LaunchOutcome::Attached(AttachResult { shell, instance })),
            Err(error) => Some(LaunchOutcome::CreateFailed(error)),
        }
    }

    pub fn drive_stage(
        &self,
        attached: &mut AttachResult,
        stage: LifecycleStage,
    ) -> anyhow::Result<()> {
        self.dispatch_delegate()
            .call_stage(attached.instance.as_mut(), stage)
    }
}

impl HostRuntime for InProcessHost {
    fn dispatch_delegate(&self) -> Arc<dyn DispatchDelegate> {
        self.dispatch.read().clone()
    }

    fn install_dispatch_delegate(&self, delegate: Arc<dyn DispatchDelegate>) {
        *self.dispatch.write() = delegate;
    }

    fn base_context(&self) -> Arc<dyn Context> {
        self.context.read().clone()
    }

    fn install_base_context(&self, context: Arc<dyn Context>) {
        *self.context.write() = context;
    }

    fn loop_hook(&self) -> Option<Arc<dyn MessageLoopHook>> {
        self.hook.read().clone()
    }

    fn install_loop_hook(&self, hook: Arc<dyn MessageLoopHook>) {
        *self.hook.write() = Some(hook);
    }

    fn fatal_handler(&self) -> Arc<dyn FatalErrorHandler> {
        self.fatal.read().clone()
    }

    fn install_fatal_handler(&self, handler: Arc<dyn FatalErrorHandler>) {
        *self.fatal.write() = handler;
    }

    fn resources(&self) -> Arc<dyn ResourceView> {
        self.resources.clone()
    }

    fn capabilities(&self) -> Arc<dyn PlatformCapabilities> {
        self.capabilities.clone()
    }

    fn placeholders(&self) -> Arc<dyn PlaceholderPool> {
        self.placeholders.clone()
    }

    fn lifecycle_listeners(&self) -> Arc<ListenerRegistry> {
        self.listeners.clone()
    }

    fn message_hub(&self) -> Arc<dyn MessageHub> {
        self.hub.clone()
    }

    fn task_host(&self) -> Arc<dyn TaskHost> {
        self.tasks.clone()
    }

    fn embedded_views(&self) -> Arc<dyn EmbeddedViewHost> {
        self.views.clone()
    }

    fn post_to_dispatch_thread(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }

    fn is_dispatch_thread(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[path = "tests/inprocess_tests.rs"]
mod tests;
