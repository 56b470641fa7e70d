use std::sync::Arc;

use parking_lot::Mutex;

use graft_host_api::{LifecycleEvent, LifecycleListener, LifecycleStage, ListenerRegistry};

/// Per-module lifecycle fan-out. The dispatch interceptor feeds it for
/// components whose context was substituted; the bridge and any
/// module-registered listeners consume it.
#[derive(Default)]
pub(crate) struct LifecycleNotifier {
    listeners: Mutex<Vec<Arc<dyn LifecycleListener>>>,
}

impl LifecycleNotifier {
    pub fn register(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn notify(&self, stage: LifecycleStage, package_id: &str, class_name: &str) {
        let listeners = self.listeners.lock().clone();
        if listeners.is_empty() {
            return;
        }
        let event = LifecycleEvent {
            stage,
            package_id: package_id.to_string(),
            class_name: class_name.to_string(),
        };
        for listener in listeners {
            listener.on_component_event(&event);
        }
    }
}

/// Replays a module's component lifecycle events into the host's listener
/// registry. Installed per module when the platform supports bridging.
pub(crate) struct LifecycleBridge {
    sink: Arc<ListenerRegistry>,
}

impl LifecycleBridge {
    pub fn new(sink: Arc<ListenerRegistry>) -> Self {
        Self { sink }
    }
}

impl LifecycleListener for LifecycleBridge {
    fn on_component_event(&self, event: &LifecycleEvent) {
        self.sink.emit(event);
    }
}
