//! Workflow Parser
//!
//! Handles loading and parsing workflow definitions from YAML files.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::WorkflowDefinition;
use super::validator::{validate_definition, DefinitionError, OrderingMode};

/// Loads a workflow definition from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Fills in defaulted names
/// 3. Validates the definition (and orders it, in topological mode)
///
/// # Example
///
/// ```rust,no_run
/// use stepwise::workflow::{load_definition, OrderingMode};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("research.yaml", OrderingMode::Declaration)?;
///     println!("Loaded {} steps", definition.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(
    path: impl AsRef<Path>,
    mode: OrderingMode,
) -> Result<WorkflowDefinition, DefinitionError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| DefinitionError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    parse_definition(&yaml_content, mode)
}

/// Parses and validates a workflow definition from YAML text.
pub fn parse_definition(
    yaml_content: &str,
    mode: OrderingMode,
) -> Result<WorkflowDefinition, DefinitionError> {
    let mut definition: WorkflowDefinition =
        serde_yaml::from_str(yaml_content).map_err(|e| DefinitionError::Parse(e.to_string()))?;

    if definition.name.trim().is_empty() {
        definition.name = definition.id.clone();
    }

    for step in &mut definition.steps {
        step.id = step.id.trim().to_string();
        if step.name.trim().is_empty() {
            step.name = step.id.clone();
        }
    }

    info!(
        "Parsed workflow '{}' v{} with {} steps",
        definition.id,
        definition.version,
        definition.steps.len()
    );

    validate_definition(&mut definition, mode)?;

    Ok(definition)
}

/// Saves a workflow definition to a YAML file.
pub fn save_definition(
    definition: &WorkflowDefinition,
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let yaml_content = serde_yaml::to_string(definition)?;
    fs::write(path.as_ref(), yaml_content)?;
    info!("Workflow saved to: {}", path.as_ref().display());
    Ok(())
}
