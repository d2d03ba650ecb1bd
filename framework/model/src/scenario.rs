use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::step::{Step, StepId};

pub type ScenarioId = String;

/// A declarative, ordered automation test case.
///
/// Definitions are loaded once per run and treated as immutable during
/// execution; step order is preserved exactly as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: ScenarioId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Path to a CSV data source. When set, the scenario runs once per row
    /// with that row's values bound as execution context variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<PathBuf>,
    pub steps: Vec<Step>,
}

impl ScenarioDefinition {
    pub fn new(id: impl Into<ScenarioId>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            data_source: None,
            steps,
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self, ModelError> {
        let definition: Self =
            serde_yaml::from_str(source).map_err(|e| ModelError::ScenarioParse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn to_yaml(&self) -> Result<String, ModelError> {
        serde_yaml::to_string(self).map_err(|e| ModelError::ScenarioParse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Step identifiers must be unique within the scenario, including steps
    /// nested in control structures.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut seen: HashSet<&StepId> = HashSet::new();
        let mut pending: Vec<&[Step]> = vec![self.steps.as_slice()];
        while let Some(steps) = pending.pop() {
            for step in steps {
                if !seen.insert(&step.id) {
                    return Err(ModelError::ScenarioParse(format!(
                        "duplicate step id '{}' in scenario '{}'",
                        step.id, self.id
                    )));
                }
                pending.extend(step.child_sequences());
            }
        }
        Ok(())
    }
}

/// All scenario definitions known to a run, keyed by id. `Call` steps are
/// resolved against this library.
#[derive(Debug, Clone, Default)]
pub struct ScenarioLibrary {
    scenarios: HashMap<ScenarioId, ScenarioDefinition>,
}

impl ScenarioLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: ScenarioDefinition) -> Result<(), ModelError> {
        definition.validate()?;
        if self.scenarios.contains_key(&definition.id) {
            return Err(ModelError::ScenarioParse(format!(
                "scenario id '{}' is already in the library",
                definition.id
            )));
        }
        self.scenarios.insert(definition.id.clone(), definition);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&ScenarioDefinition, ModelError> {
        self.scenarios
            .get(id)
            .ok_or_else(|| ModelError::UnknownScenario(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &ScenarioId> {
        self.scenarios.keys()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
