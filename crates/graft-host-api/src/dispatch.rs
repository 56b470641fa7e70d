use std::any::Any;
use std::sync::Arc;

use crate::code::{CodeLoadError, CodeLoader, ModuleDelegate};
use crate::component::{ComponentInstance, ComponentShell, ComponentTarget, LifecycleStage};

/// Process-wide dispatcher. Constructs component and delegate objects and
/// drives their lifecycle methods. The host installs its real
/// implementation at startup; the runtime wraps the slot in place.
pub trait DispatchDelegate: Send + Sync {
    fn instantiate(
        &self,
        loader: &Arc<dyn CodeLoader>,
        target: &ComponentTarget,
    ) -> Result<Box<dyn ComponentInstance>, CodeLoadError>;

    fn instantiate_delegate(
        &self,
        loader: &Arc<dyn CodeLoader>,
        class_name: &str,
    ) -> Result<Box<dyn ModuleDelegate>, CodeLoadError>;

    /// Drive the construction lifecycle entry of a freshly attached
    /// component.
    fn call_create(
        &self,
        instance: &mut dyn ComponentInstance,
        shell: &mut dyn ComponentShell,
    ) -> anyhow::Result<()>;

    fn call_stage(
        &self,
        instance: &mut dyn ComponentInstance,
        stage: LifecycleStage,
    ) -> anyhow::Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// One unit of work observed on the host dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopMessage {
    LaunchComponent { target: ComponentTarget },
    StopComponent { class_name: String },
    Other { what: u32 },
}

/// Callback slot on the host dispatch loop. Returning `true` consumes the
/// message.
pub trait MessageLoopHook: Send + Sync {
    fn handle(&self, message: &LoopMessage) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// Process-wide last-resort error sink.
pub trait FatalErrorHandler: Send + Sync {
    fn on_fatal(&self, origin: &str, details: &str);
}
