//! Registry of filter types known to a host.

use super::{DeinterlaceDefinition, FilterDefinition, FilterHost, FilterRuntime, NodeId};
use crate::error::{FilterError, Result};
use crate::settings::Property;
use serde_yaml::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Filter definitions keyed by id, in registration order.
pub struct FilterRegistry<H: FilterHost> {
    filters: HashMap<&'static str, Arc<dyn FilterDefinition<H>>>,
    order: Vec<&'static str>,
}

impl<H: FilterHost> Default for FilterRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: FilterHost> FilterRegistry<H> {
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// A registry holding every filter this crate provides.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DeinterlaceDefinition::default());
        registry
    }

    /// Register a filter definition, replacing any previous one with the same id.
    pub fn register(&mut self, definition: impl FilterDefinition<H> + 'static) {
        let id = definition.id();
        if self.filters.insert(id, Arc::new(definition)).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn FilterDefinition<H>>> {
        self.filters.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.filters.contains_key(id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> &[&'static str] {
        &self.order
    }

    pub fn display_name(&self, id: &str) -> Option<&'static str> {
        self.get(id).map(|def| def.display_name())
    }

    pub fn defaults(&self, id: &str) -> Result<Value> {
        Ok(self.definition(id)?.defaults())
    }

    pub fn properties(&self, id: &str) -> Result<Vec<Property>> {
        Ok(self.definition(id)?.properties())
    }

    /// Attach a new instance of filter `id` with `settings` layered over its defaults.
    pub fn create(
        &self,
        id: &str,
        settings: &Value,
        context: NodeId,
        graphics: &H::Graphics,
    ) -> Result<Box<dyn FilterRuntime<H>>> {
        let definition = self.definition(id)?;
        let settings = merge_defaults(&definition.defaults(), settings);
        info!("Creating {} for {:?}", definition.display_name(), context);
        definition.attach(&settings, context, graphics)
    }

    /// Replace `current` with a freshly attached instance of filter `id`.
    ///
    /// The old instance is detached only once the new one exists, so nothing it
    /// retained carries over. On error `current` is left as it was.
    pub fn recreate(
        &self,
        id: &str,
        current: &mut Box<dyn FilterRuntime<H>>,
        settings: &Value,
        context: NodeId,
        graphics: &H::Graphics,
    ) -> Result<()> {
        let fresh = self.create(id, settings, context, graphics)?;
        std::mem::replace(current, fresh).detach();
        Ok(())
    }

    fn definition(&self, id: &str) -> Result<Arc<dyn FilterDefinition<H>>> {
        self.get(id)
            .ok_or_else(|| FilterError::UnknownFilter(id.to_string()))
    }
}

/// Overlay the keys of `settings` on `defaults`.
///
/// Non-mapping settings are returned unchanged so the filter can report them.
pub fn merge_defaults(defaults: &Value, settings: &Value) -> Value {
    match (defaults, settings) {
        (_, Value::Null) => defaults.clone(),
        (Value::Mapping(defaults), Value::Mapping(settings)) => {
            let mut merged = defaults.clone();
            for (key, value) in settings {
                merged.insert(key.clone(), value.clone());
            }
            Value::Mapping(merged)
        }
        _ => settings.clone(),
    }
}
