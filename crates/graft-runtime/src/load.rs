use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use graft_host_api::{
    CodeLoadError, CodeLoader, CodeSources, ComponentInstance, ModuleDelegate, ModuleDescriptor,
    ResourceSources, ResourceView,
};

use crate::error::{Error, Result};
use crate::model::LoadedModule;
use crate::state::ResourceFailurePolicy;

/// First-match loader chain over archive segments, running dependency
/// loaders, and (for non-standalone modules) the host loader.
pub struct ChainedCodeLoader {
    tag: String,
    segments: Vec<Arc<dyn CodeLoader>>,
}

impl ChainedCodeLoader {
    pub(crate) fn new(tag: String, segments: Vec<Arc<dyn CodeLoader>>) -> Self {
        Self { tag, segments }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment_for(&self, class_name: &str) -> Option<&Arc<dyn CodeLoader>> {
        self.segments
            .iter()
            .find(|segment| segment.contains_class(class_name))
    }
}

impl CodeLoader for ChainedCodeLoader {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn contains_class(&self, class_name: &str) -> bool {
        self.segment_for(class_name).is_some()
    }

    fn instantiate_component(
        &self,
        class_name: &str,
    ) -> std::result::Result<Box<dyn ComponentInstance>, CodeLoadError> {
        match self.segment_for(class_name) {
            Some(segment) => segment.instantiate_component(class_name),
            None => Err(CodeLoadError::class_not_found(&self.tag, class_name)),
        }
    }

    fn instantiate_delegate(
        &self,
        class_name: &str,
    ) -> std::result::Result<Box<dyn ModuleDelegate>, CodeLoadError> {
        match self.segment_for(class_name) {
            Some(segment) => segment.instantiate_delegate(class_name),
            None => Err(CodeLoadError::class_not_found(&self.tag, class_name)),
        }
    }
}

/// Build the module resource view under the configured failure policy.
/// Returns the view and whether it degraded to the host table.
pub(crate) fn build_resource_view(
    descriptor: &ModuleDescriptor,
    sources: &Arc<dyn ResourceSources>,
    host_resources: Arc<dyn ResourceView>,
    policy: ResourceFailurePolicy,
) -> Result<(Arc<dyn ResourceView>, bool)> {
    match sources.build_view(&descriptor.installed_path, host_resources.clone()) {
        Ok(view) => Ok((view, false)),
        Err(source) => match policy {
            ResourceFailurePolicy::FailFast => {
                Err(Error::resource_load(&descriptor.package_id, source))
            }
            ResourceFailurePolicy::Degrade => {
                warn!(
                    package_id = descriptor.package_id.as_str(),
                    error = %source,
                    "module resource view failed, continuing with host resources"
                );
                Ok((host_resources, true))
            }
        },
    }
}

/// Build the scoped loader chain (archives, then running dependencies,
/// then the host loader unless standalone) and the widened variant used
/// during privileged lookup. The two are the same chain for non-standalone
/// modules.
pub(crate) fn build_code_loader(
    descriptor: &ModuleDescriptor,
    sources: &Arc<dyn CodeSources>,
    running: &HashMap<String, Arc<LoadedModule>>,
    host_loader: Arc<dyn CodeLoader>,
) -> Result<(Arc<dyn CodeLoader>, Arc<dyn CodeLoader>)> {
    let mut segments: Vec<Arc<dyn CodeLoader>> =
        Vec::with_capacity(descriptor.archives.len() + descriptor.dependencies.len() + 2);
    let primary = sources
        .open_archive(&descriptor.installed_path)
        .map_err(|source| Error::code_load(&descriptor.package_id, source))?;
    segments.push(primary);
    for shard in &descriptor.archives {
        let loader = sources
            .open_archive(shard)
            .map_err(|source| Error::code_load(&descriptor.package_id, source))?;
        segments.push(loader);
    }
    for dependency in &descriptor.dependencies {
        match running.get(dependency) {
            Some(module) => segments.push(module.code_loader()),
            None => warn!(
                package_id = descriptor.package_id.as_str(),
                dependency = dependency.as_str(),
                "dependency module not running, skipping its loader"
            ),
        }
    }

    let mut widened_segments = segments.clone();
    widened_segments.push(host_loader);
    if !descriptor.standalone {
        segments = widened_segments.clone();
    }

    let scoped: Arc<dyn CodeLoader> = Arc::new(ChainedCodeLoader::new(
        descriptor.package_id.clone(),
        segments,
    ));
    let widened: Arc<dyn CodeLoader> = if descriptor.standalone {
        Arc::new(ChainedCodeLoader::new(
            descriptor.package_id.clone(),
            widened_segments,
        ))
    } else {
        scoped.clone()
    };
    Ok((scoped, widened))
}

#[cfg(test)]
#[path = "tests/load_tests.rs"]
mod tests;
