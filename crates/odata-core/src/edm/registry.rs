//! Process-wide EDM registry.
//!
//! Registration appends declarations and drops the cached model; the next
//! [`EdmRegistry::entity_data_model`] call rebuilds it from everything
//! registered so far. A failed build caches nothing, so callers never see a
//! stale model after a bad registration.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::builder::build_model;
use super::definition::{Declaration, ModelDefinition};
use super::model::EntityDataModel;
use super::MetadataError;

#[derive(Debug, Default)]
struct Pending {
    declarations: Vec<Declaration>,
    generation: u64,
}

#[derive(Debug)]
pub struct EdmRegistry {
    container_name: String,
    /// Serialises registrations and builds against each other.
    pending: Mutex<Pending>,
    cached: RwLock<Option<Arc<EntityDataModel>>>,
}

impl EdmRegistry {
    pub fn new(container_name: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            pending: Mutex::new(Pending::default()),
            cached: RwLock::new(None),
        }
    }

    /// Registry seeded from a model file.
    pub fn from_definition(definition: ModelDefinition, default_container: &str) -> Self {
        let registry = Self::new(
            definition
                .container
                .unwrap_or_else(|| default_container.to_string()),
        );
        registry.register(definition.declarations);
        registry
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// Append declarations and invalidate the cached model.
    pub fn register(&self, declarations: impl IntoIterator<Item = Declaration>) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.declarations.extend(declarations);
        pending.generation += 1;
        // Invalidate while still holding `pending` so a concurrent build
        // cannot cache a model missing these declarations.
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!(
            generation = pending.generation,
            declarations = pending.declarations.len(),
            "EDM declarations registered; cached model invalidated"
        );
    }

    /// Number of registrations so far.
    pub fn generation(&self) -> u64 {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// The cached model, or a fresh build from all registered declarations.
    pub fn entity_data_model(&self) -> Result<Arc<EntityDataModel>, MetadataError> {
        if let Some(model) = self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(model));
        }

        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have built while we waited for the lock.
        if let Some(model) = self
            .cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Ok(Arc::clone(model));
        }

        match build_model(&self.container_name, &pending.declarations) {
            Ok(model) => {
                let model = Arc::new(model);
                *self.cached.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&model));
                tracing::info!(
                    generation = pending.generation,
                    types = model.declared_types().count(),
                    entity_sets = model.container().entity_sets.len(),
                    "EDM rebuilt"
                );
                Ok(model)
            }
            Err(err) => {
                tracing::error!(
                    generation = pending.generation,
                    violations = err.violations().len(),
                    "EDM build failed: {err}"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edm::definition::{EntityDeclaration, NavigationDeclaration};

    fn customer() -> Declaration {
        EntityDeclaration::new("Demo", "Customer")
            .with_key("Id", "Edm.String")
            .in_entity_set("Customers")
            .into()
    }

    #[test]
    fn cached_model_is_reused() {
        let registry = EdmRegistry::new("Container");
        registry.register([customer()]);
        let a = registry.entity_data_model().unwrap();
        let b = registry.entity_data_model().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registration_invalidates_cache() {
        let registry = EdmRegistry::new("Container");
        registry.register([customer()]);
        let first = registry.entity_data_model().unwrap();
        assert!(first.entity_set("Orders").is_none());

        registry.register([EntityDeclaration::new("Demo", "Order")
            .with_key("Id", "Edm.Int32")
            .in_entity_set("Orders")
            .into()]);
        let second = registry.entity_data_model().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.entity_set("Orders").is_some());
        assert_eq!(registry.generation(), 2);
    }

    #[test]
    fn failed_build_caches_nothing() {
        let registry = EdmRegistry::new("Container");
        registry.register([customer()]);
        assert!(registry.entity_data_model().is_ok());

        registry.register([EntityDeclaration::new("Demo", "Broken")
            .with_key("Id", "Edm.Int32")
            .with_navigation(NavigationDeclaration::single("Nope", "Demo.Missing"))
            .into()]);
        assert!(registry.entity_data_model().is_err());
        // Still failing: no fallback to the earlier model.
        assert!(registry.entity_data_model().is_err());
    }

    #[test]
    fn empty_registry_builds_empty_model() {
        let registry = EdmRegistry::new("Container");
        let model = registry.entity_data_model().unwrap();
        assert!(model.container().entity_sets.is_empty());
        assert_eq!(model.container().name, "Container");
    }
}
