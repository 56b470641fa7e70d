use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Theme identifier in a resource table. `0` means "not declared".
pub type ThemeId = u32;
/// Icon or logo identifier in a resource table. `0` means "not declared".
pub type ResourceId = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    #[default]
    Standard,
    SingleTop,
    SingleTask,
    SingleInstance,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Unspecified,
    Portrait,
    Landscape,
}

/// Metadata a module declares for one real component class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDecl {
    #[serde(default)]
    pub theme: ThemeId,
    #[serde(default)]
    pub icon: ResourceId,
    #[serde(default)]
    pub logo: ResourceId,
    #[serde(default)]
    pub orientation: Option<Orientation>,
    #[serde(default)]
    pub immersive: Option<bool>,
    #[serde(default)]
    pub launch_mode: LaunchMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDecl {
    pub class_name: String,
    pub authority: String,
    #[serde(default)]
    pub exported: bool,
}

/// Resolved description of one installed module, handed to the runtime by a
/// [`DescriptorProvider`]. Parsing and on-disk layout stay outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub package_id: String,
    #[serde(default)]
    pub version: String,
    pub installed_path: PathBuf,
    /// Self-contained module: resources are not merged into the host table
    /// and class lookup does not fall back to the host loader.
    #[serde(default)]
    pub standalone: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Extra code archives beyond the primary one at `installed_path`.
    #[serde(default)]
    pub archives: Vec<PathBuf>,
    #[serde(default)]
    pub delegate_class: Option<String>,
    /// Real class name to declared metadata.
    #[serde(default)]
    pub components: HashMap<String, ComponentDecl>,
    #[serde(default)]
    pub providers: Vec<ProviderDecl>,
    #[serde(default)]
    pub app_theme: ThemeId,
    #[serde(default)]
    pub app_icon: ResourceId,
    #[serde(default)]
    pub app_logo: ResourceId,
}

impl ModuleDescriptor {
    pub fn new(package_id: impl Into<String>, installed_path: impl Into<PathBuf>) -> Self {
        Self {
            package_id: package_id.into(),
            version: String::new(),
            installed_path: installed_path.into(),
            standalone: false,
            dependencies: Vec::new(),
            archives: Vec::new(),
            delegate_class: None,
            components: HashMap::new(),
            providers: Vec::new(),
            app_theme: 0,
            app_icon: 0,
            app_logo: 0,
        }
    }

    /// Delegate class if declared and non-empty.
    pub fn declared_delegate(&self) -> Option<&str> {
        self.delegate_class.as_deref().filter(|class| !class.is_empty())
    }
}

/// Resolves package ids to descriptors, backed by whatever installation
/// store the host maintains.
pub trait DescriptorProvider: Send + Sync {
    fn descriptor(&self, package_id: &str) -> Option<ModuleDescriptor>;
}
