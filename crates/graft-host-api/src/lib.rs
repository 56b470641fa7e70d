//! Host-facing contract for the graft plugin-module runtime.
//!
//! Defines the platform-adapter trait ([`HostRuntime`]) with its patchable
//! interception slots, the collaborator seams the runtime consumes
//! (resources, code loading, descriptors, placeholders, messaging, tasks),
//! the shared data model, and an in-process reference host under
//! [`inprocess`].

mod capabilities;
mod code;
mod component;
mod context;
mod descriptor;
mod dispatch;
mod host;
pub mod inprocess;
mod resources;

pub use capabilities::*;
pub use code::*;
pub use component::*;
pub use context::*;
pub use descriptor::*;
pub use dispatch::*;
pub use host::*;
pub use resources::*;
