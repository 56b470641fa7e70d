use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::code::CodeLoader;
use crate::component::ComponentTarget;
use crate::descriptor::LaunchMode;
use crate::resources::ResourceView;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no component registered for class `{class_name}`")]
    UnknownComponent { class_name: String },
    #[error("no placeholder declared for launch mode {mode:?}")]
    PlaceholderExhausted { mode: LaunchMode },
    #[error("dispatch rejected: {details}")]
    Rejected { details: String },
}

/// Background-task start request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRequest {
    pub class_name: String,
    pub payload: String,
    /// Owning package id, stamped by the interception layer when the class
    /// belongs to a loaded module.
    pub origin: Option<String>,
}

impl TaskRequest {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            payload: String::new(),
            origin: None,
        }
    }
}

/// Channel-addressed broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub channel: String,
    pub payload: String,
    pub origin: Option<String>,
}

impl BroadcastMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            origin: None,
        }
    }
}

pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &BroadcastMessage);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(pub u64);

/// Execution context: the object through which code resolves resources,
/// classes, and ambient identity, and reaches the host's dispatch surface.
pub trait Context: Send + Sync {
    fn package_id(&self) -> &str;
    fn resources(&self) -> Arc<dyn ResourceView>;
    fn code_loader(&self) -> Arc<dyn CodeLoader>;
    fn launch_component(&self, target: ComponentTarget) -> Result<(), DispatchError>;
    fn start_task(&self, request: TaskRequest) -> Result<(), DispatchError>;
    fn broadcast(&self, message: BroadcastMessage) -> Result<(), DispatchError>;
    fn subscribe(&self, channel: &str, listener: Arc<dyn MessageListener>) -> SubscriptionToken;
    fn as_any(&self) -> &dyn Any;
}
