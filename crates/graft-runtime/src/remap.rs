use std::sync::Arc;

use tracing::{debug, warn};

use graft_host_api::{Capability, ComponentShell, Context, ThemeId};

use crate::context::ContextInterceptor;
use crate::state::RuntimeState;

pub(crate) enum RemapOutcome {
    Plugin {
        package_id: String,
        class_name: String,
    },
    Host,
}

/// Strict theme priority: component-declared, then module application,
/// then host placeholder. First non-zero wins.
pub(crate) fn resolve_theme(
    component: ThemeId,
    module_app: ThemeId,
    placeholder: ThemeId,
) -> ThemeId {
    if component != 0 {
        component
    } else if module_app != 0 {
        module_app
    } else {
        placeholder
    }
}

/// Rewire a freshly attached component before its construction lifecycle
/// method runs. Plugin-bound components get the full remap; host
/// components get only the identity-marker context substitution.
pub(crate) fn remap_component(
    state: &Arc<RuntimeState>,
    shell: &mut dyn ComponentShell,
) -> RemapOutcome {
    let real_class = shell.target().real_class().to_string();
    let was_rewritten = shell.target().is_rewritten();

    let binding = state.components.lookup(&real_class);
    let module = binding
        .as_ref()
        .and_then(|binding| state.module(&binding.package_id));
    let (Some(binding), Some(module)) = (binding, module) else {
        if was_rewritten {
            warn!(
                class_name = real_class.as_str(),
                "target names a plugin class with no running module, treating as host component"
            );
        }
        let marker: Arc<dyn Context> = Arc::new(ContextInterceptor::new(
            shell.base_context(),
            Arc::downgrade(state),
        ));
        shell.replace_base_context(marker);
        return RemapOutcome::Host;
    };

    let context = module.context();
    let context_dyn: Arc<dyn Context> = context.clone();
    shell.replace_base_context(context_dyn.clone());
    shell.clear_resource_cache();

    let theme = resolve_theme(
        binding.decl.theme,
        binding.app_theme,
        shell.placeholder_theme(),
    );
    if theme != 0 {
        shell.apply_theme(theme);
        context.set_theme(theme);
    }
    shell.rebuild_inflater(&context_dyn);

    let capabilities = state.host.capabilities();
    if binding.standalone && capabilities.supports(Capability::WindowBranding) {
        let icon = if binding.decl.icon != 0 {
            binding.decl.icon
        } else {
            binding.app_icon
        };
        let logo = if binding.decl.logo != 0 {
            binding.decl.logo
        } else {
            binding.app_logo
        };
        if icon != 0 || logo != 0 {
            shell.set_window_branding(icon, logo);
        }
    }
    if let Some(orientation) = binding.decl.orientation {
        if capabilities.supports(Capability::OrientationControl) {
            shell.set_orientation(orientation);
        }
    }
    if let Some(immersive) = binding.decl.immersive {
        if capabilities.supports(Capability::ImmersiveMode) {
            shell.set_immersive(immersive);
        }
    }
    shell.set_title(&real_class);

    debug!(
        package_id = binding.package_id.as_str(),
        class_name = real_class.as_str(),
        theme,
        launch_mode = ?binding.decl.launch_mode,
        "component remapped onto plugin module"
    );
    RemapOutcome::Plugin {
        package_id: binding.package_id,
        class_name: real_class,
    }
}

#[cfg(test)]
#[path = "tests/remap_tests.rs"]
mod tests;
