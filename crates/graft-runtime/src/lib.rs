//! Plugin module runtime for a fixed host process.
//!
//! The runtime loads plugin modules at runtime, keeps a registry of what is
//! running, and intercepts a small set of host runtime objects so that
//! components declared by modules can be launched through the host's own
//! dispatch machinery. Interception is cooperative: the host exposes slots
//! through [`graft_host_api::HostRuntime`], and the runtime installs wrappers
//! that forward host traffic unchanged while remapping module traffic.
//!
//! Entry point is [`ModuleRuntimeService`]: construct one per process, start
//! modules through it, and stop them through its best-effort teardown.

mod bridge;
mod components;
mod context;
mod error;
mod events;
mod load;
mod model;
mod patch;
mod remap;
mod service;
mod state;

pub use components::{ComponentBinding, ProviderBinding};
pub use context::{ContextInterceptor, ModuleContext};
pub use error::{Error, Result};
pub use events::{ModuleSignal, ModuleSignalBus};
pub use load::ChainedCodeLoader;
pub use model::{
    LoadedModule, ModuleInfo, StepStatus, TeardownReport, TeardownStep, TeardownStepOutcome,
};
pub use patch::{AttachTrace, DispatchInterceptor};
pub use service::ModuleRuntimeService;
pub use state::{ResourceFailurePolicy, RuntimeOptions};
