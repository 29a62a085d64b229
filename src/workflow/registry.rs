//! Workflow Registry
//!
//! Stores validated, immutable workflow definitions by id.

use std::sync::Arc;

use dashmap::DashMap;
use log::info;

use super::model::WorkflowDefinition;
use super::validator::{validate_definition, DefinitionError, OrderingMode};

/// Thread-safe store of registered workflow definitions.
#[derive(Debug, Default)]
pub struct WorkflowRegistry {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
    mode: OrderingMode,
}

impl WorkflowRegistry {
    pub fn new(mode: OrderingMode) -> Self {
        Self {
            definitions: DashMap::new(),
            mode,
        }
    }

    pub fn mode(&self) -> OrderingMode {
        self.mode
    }

    /// Validates and stores a definition.
    ///
    /// Definitions are immutable once registered; registering an id twice
    /// is an error.
    pub fn register(
        &self,
        mut definition: WorkflowDefinition,
    ) -> Result<Arc<WorkflowDefinition>, DefinitionError> {
        if self.definitions.contains_key(&definition.id) {
            return Err(DefinitionError::AlreadyRegistered(definition.id));
        }

        validate_definition(&mut definition, self.mode)?;

        let definition = Arc::new(definition);
        self.definitions
            .insert(definition.id.clone(), Arc::clone(&definition));

        info!(
            "Registered workflow '{}' ({} steps)",
            definition.id,
            definition.steps.len()
        );
        Ok(definition)
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns every registered definition, sorted by id.
    pub fn list_all(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut all: Vec<_> = self
            .definitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
