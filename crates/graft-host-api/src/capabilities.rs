use std::collections::HashSet;

/// Platform feature probes, replacing version-number comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Component lifecycle events can be observed and re-emitted.
    LifecycleBridge,
    /// Component windows accept icon and logo branding metadata.
    WindowBranding,
    /// Components may request a fixed orientation.
    OrientationControl,
    /// Immersive (hidden system chrome) display is available.
    ImmersiveMode,
}

pub trait PlatformCapabilities: Send + Sync {
    fn supports(&self, capability: Capability) -> bool;
}

/// Everything supported. The default for hosts without platform limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullCapabilities;

impl PlatformCapabilities for FullCapabilities {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }
}

/// Explicit capability set, for hosts that gate features.
#[derive(Debug, Default, Clone)]
pub struct CapabilitySet {
    enabled: HashSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.enabled.insert(capability);
        self
    }
}

impl PlatformCapabilities for CapabilitySet {
    fn supports(&self, capability: Capability) -> bool {
        self.enabled.contains(&capability)
    }
}
