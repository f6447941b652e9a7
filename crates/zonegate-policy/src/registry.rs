//! Category → engine registry.
//!
//! The registry is the single registration point for policy categories.
//! It is built once at startup and shared immutably afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::BuiltinPolicy;
use crate::cors::CorsPolicy;
use crate::engine::PolicyEngine;
use crate::error::{PolicyError, Result};

/// Registry mapping category names to policy engines.
#[derive(Default)]
pub struct PolicyRegistry {
    engines: HashMap<&'static str, Arc<dyn PolicyEngine>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the shipped engines registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CorsPolicy::new()));
        registry.register(Arc::new(BuiltinPolicy::new()));
        registry
    }

    /// Register an engine under its category name, replacing any previous
    /// registration for that category.
    pub fn register(&mut self, engine: Arc<dyn PolicyEngine>) {
        let category = engine.category();
        if self.engines.insert(category, engine).is_some() {
            tracing::warn!(category, "Replaced existing policy engine registration");
        }
    }

    /// Look up the engine for a category.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::UnknownCategory` if no engine is registered.
    pub fn engine(&self, category: &str) -> Result<Arc<dyn PolicyEngine>> {
        self.engines
            .get(category)
            .cloned()
            .ok_or_else(|| PolicyError::UnknownCategory(category.to_string()))
    }

    /// Registered category names.
    #[must_use]
    pub fn categories(&self) -> Vec<&'static str> {
        self.engines.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BUILTIN_CATEGORY;

    #[test]
    fn defaults_cover_shipped_categories() {
        let registry = PolicyRegistry::with_defaults();
        assert!(registry.engine("cors").is_ok());
        assert!(registry.engine(BUILTIN_CATEGORY).is_ok());
    }

    #[test]
    fn unknown_category_is_rejected() {
        let registry = PolicyRegistry::with_defaults();
        let err = registry.engine("waf").unwrap_err();
        assert!(matches!(err, PolicyError::UnknownCategory(c) if c == "waf"));
    }
}
