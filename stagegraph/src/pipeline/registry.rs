//! Stage registry.

use std::collections::HashMap;

use super::{GraphBuilder, StageGraph, StageSpec};
use crate::errors::GraphError;

/// Named collection of stage specifications, kept in registration order.
///
/// The registry only guarantees name uniqueness. Predecessors may refer to
/// stages registered later; they are resolved by [`StageRegistry::build`].
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    name: String,
    stages: Vec<StageSpec>,
    index: HashMap<String, usize>,
}

impl StageRegistry {
    /// Creates an empty registry for the pipeline `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Registers a stage.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::DuplicateStage` if the name is already taken.
    pub fn register(&mut self, spec: StageSpec) -> Result<(), GraphError> {
        if self.index.contains_key(&spec.name) {
            return Err(GraphError::DuplicateStage { stage: spec.name });
        }
        self.index.insert(spec.name.clone(), self.stages.len());
        self.stages.push(spec);
        Ok(())
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StageSpec> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    /// Returns true if a stage is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Iterates stages in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.iter()
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Validates the registry and compiles it into an executable graph.
    ///
    /// The registry is left untouched, so building twice gives identical graphs.
    ///
    /// # Errors
    ///
    /// See [`GraphBuilder::build`].
    pub fn build(&self) -> Result<StageGraph, GraphError> {
        GraphBuilder::build(&self.name, self.stages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;
    use std::sync::Arc;

    fn noop(name: &str) -> StageSpec {
        StageSpec::synchronous(name, Arc::new(NoOpStage::new(name)))
    }

    #[test]
    fn test_register_preserves_order() {
        let mut registry = StageRegistry::new("ml");
        registry.register(noop("b")).unwrap();
        registry.register(noop("a")).unwrap();

        let names: Vec<&str> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(registry.get("c").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = StageRegistry::new("ml");
        registry.register(noop("a")).unwrap();
        let err = registry.register(noop("a")).unwrap_err();

        assert_eq!(err, GraphError::DuplicateStage { stage: "a".to_string() });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_forward_references_allowed_until_build() {
        let mut registry = StageRegistry::new("ml");
        registry.register(noop("b").with_predecessor("a")).unwrap();
        registry.register(noop("a")).unwrap();

        let graph = registry.build().unwrap();
        assert_eq!(graph.execution_order(), &["a".to_string(), "b".to_string()]);
    }
}
