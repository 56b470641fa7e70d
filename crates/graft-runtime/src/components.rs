use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use graft_host_api::{ComponentDecl, ModuleDescriptor, ResourceId, ThemeId};

/// Binding of one real component class to its owning module. Module-level
/// fields are denormalized so the attach path reads one record.
#[derive(Debug, Clone)]
pub struct ComponentBinding {
    pub package_id: String,
    pub class_name: String,
    pub decl: ComponentDecl,
    pub standalone: bool,
    pub app_theme: ThemeId,
    pub app_icon: ResourceId,
    pub app_logo: ResourceId,
}

#[derive(Debug, Clone)]
pub struct ProviderBinding {
    pub package_id: String,
    pub class_name: String,
    pub authority: String,
    pub exported: bool,
}

/// Process-wide class-to-module tables. Read on every component attach,
/// rebuilt on module start/stop.
pub(crate) struct ComponentTable {
    components: ArcSwap<HashMap<String, ComponentBinding>>,
    providers: ArcSwap<HashMap<String, ProviderBinding>>,
}

impl ComponentTable {
    pub fn new() -> Self {
        Self {
            components: ArcSwap::from_pointee(HashMap::new()),
            providers: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn register_components(&self, descriptor: &ModuleDescriptor) {
        if descriptor.components.is_empty() {
            return;
        }
        let mut next: HashMap<String, ComponentBinding> = (**self.components.load()).clone();
        for (class_name, decl) in &descriptor.components {
            next.insert(
                class_name.clone(),
                ComponentBinding {
                    package_id: descriptor.package_id.clone(),
                    class_name: class_name.clone(),
                    decl: decl.clone(),
                    standalone: descriptor.standalone,
                    app_theme: descriptor.app_theme,
                    app_icon: descriptor.app_icon,
                    app_logo: descriptor.app_logo,
                },
            );
        }
        self.components.store(Arc::new(next));
    }

    pub fn register_providers(&self, descriptor: &ModuleDescriptor) {
        if descriptor.providers.is_empty() {
            return;
        }
        let mut next: HashMap<String, ProviderBinding> = (**self.providers.load()).clone();
        for provider in &descriptor.providers {
            next.insert(
                provider.authority.clone(),
                ProviderBinding {
                    package_id: descriptor.package_id.clone(),
                    class_name: provider.class_name.clone(),
                    authority: provider.authority.clone(),
                    exported: provider.exported,
                },
            );
        }
        self.providers.store(Arc::new(next));
    }

    /// Remove every binding owned by `package_id`, returning how many went.
    pub fn deregister_module(&self, package_id: &str) -> usize {
        let mut removed = 0;
        let mut components: HashMap<String, ComponentBinding> = (**self.components.load()).clone();
        let before = components.len();
        components.retain(|_, binding| binding.package_id != package_id);
        removed += before - components.len();
        self.components.store(Arc::new(components));

        let mut providers: HashMap<String, ProviderBinding> = (**self.providers.load()).clone();
        let before = providers.len();
        providers.retain(|_, binding| binding.package_id != package_id);
        removed += before - providers.len();
        self.providers.store(Arc::new(providers));

        removed
    }

    pub fn lookup(&self, class_name: &str) -> Option<ComponentBinding> {
        self.components.load().get(class_name).cloned()
    }

    pub fn resolve_provider(&self, authority: &str) -> Option<ProviderBinding> {
        self.providers.load().get(authority).cloned()
    }

    pub fn component_count(&self) -> usize {
        self.components.load().len()
    }
}

#[cfg(test)]
#[path = "tests/components_tests.rs"]
mod tests;
