use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Context;
use crate::descriptor::{Orientation, ResourceId, ThemeId};

/// Extras key carrying the real class through a placeholder-rewritten launch.
pub const REAL_CLASS_EXTRA: &str = "graft.component.real-class";

/// Identity of one component launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentTarget {
    pub class_name: String,
    pub package_id: Option<String>,
    pub extras: HashMap<String, String>,
}

impl ComponentTarget {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            package_id: None,
            extras: HashMap::new(),
        }
    }

    /// Real class behind a placeholder rewrite, falling back to the declared
    /// class name.
    pub fn real_class(&self) -> &str {
        self.extras
            .get(REAL_CLASS_EXTRA)
            .map(String::as_str)
            .unwrap_or(&self.class_name)
    }

    /// Whether this target was rewritten onto a placeholder.
    pub fn is_rewritten(&self) -> bool {
        self.extras.contains_key(REAL_CLASS_EXTRA)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    SaveState,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub stage: LifecycleStage,
    pub package_id: String,
    pub class_name: String,
}

pub trait LifecycleListener: Send + Sync {
    fn on_component_event(&self, event: &LifecycleEvent);
}

/// Host-side registry of lifecycle listeners. Bridged module events are
/// re-emitted here.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.write().push(listener);
    }

    pub fn emit(&self, event: &LifecycleEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_component_event(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live component produced by a [`CodeLoader`](crate::code::CodeLoader).
pub trait ComponentInstance: Send {
    fn class_name(&self) -> &str;
    /// Construction lifecycle entry, driven through the dispatch delegate.
    fn on_create(&mut self) -> anyhow::Result<()>;
    fn on_stage(&mut self, stage: LifecycleStage) -> anyhow::Result<()> {
        let _ = stage;
        Ok(())
    }
}

/// A partially initialized component as the host hands it over, right
/// before its construction lifecycle method runs. The remap pass mutates
/// these slots.
pub trait ComponentShell {
    fn target(&self) -> &ComponentTarget;
    fn base_context(&self) -> Arc<dyn Context>;
    fn replace_base_context(&mut self, context: Arc<dyn Context>);
    /// Drop resource objects cached from the previous base context.
    fn clear_resource_cache(&mut self);
    /// Theme already applied from the placeholder declaration, `0` if none.
    fn placeholder_theme(&self) -> ThemeId;
    fn apply_theme(&mut self, theme: ThemeId);
    /// Rebind the layout-inflation facility to `context`.
    fn rebuild_inflater(&mut self, context: &Arc<dyn Context>);
    fn set_window_branding(&mut self, icon: ResourceId, logo: ResourceId);
    fn set_orientation(&mut self, orientation: Orientation);
    fn set_immersive(&mut self, on: bool);
    fn set_title(&mut self, title: &str);
}
