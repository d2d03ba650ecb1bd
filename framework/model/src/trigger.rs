use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::bind::Variables;
use crate::error::ModelError;
use crate::scenario::ScenarioId;

/// Maps a log-line pattern to a scenario invocation.
///
/// Rules are evaluated in declaration order and the first match wins per
/// line. Named capture groups feed execution context variables through
/// `bind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub pattern: String,
    pub scenario: ScenarioId,
    /// Capture group name to execution context variable name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub bind: HashMap<String, String>,
}

/// One log source and the ordered rules applied to its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSource {
    pub path: PathBuf,
    pub rules: Vec<TriggerRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub sources: Vec<WatchSource>,
}

impl TriggerConfig {
    pub fn from_yaml(source: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(source).map_err(|e| ModelError::ScenarioParse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_yaml(&source)
    }
}

impl TriggerRule {
    pub fn compile(&self) -> Result<CompiledRule, ModelError> {
        let regex = Regex::new(&self.pattern).map_err(|source| ModelError::TriggerPattern {
            pattern: self.pattern.clone(),
            source,
        })?;
        Ok(CompiledRule {
            regex,
            scenario: self.scenario.clone(),
            bind: self.bind.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    regex: Regex,
    pub scenario: ScenarioId,
    bind: HashMap<String, String>,
}

impl CompiledRule {
    /// Apply the rule to one log line, returning the extracted variables on
    /// a match. First-match-wins across rules is the caller's concern.
    pub fn match_line(&self, line: &str) -> Option<Variables> {
        let caps = self.regex.captures(line)?;
        let mut vars = Variables::new();
        for (group, var) in &self.bind {
            if let Some(m) = caps.name(group) {
                vars.insert(var.clone(), m.as_str().to_string());
            }
        }
        Some(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_extracts_named_captures_into_variables() {
        let rule = TriggerRule {
            pattern: r"user (?P<name>\w+) logged in".to_string(),
            scenario: "post-login-check".to_string(),
            bind: [("name".to_string(), "user".to_string())].into_iter().collect(),
        };
        let compiled = rule.compile().unwrap();

        let vars = compiled.match_line("2024-01-01 user ada logged in").unwrap();
        assert_eq!(vars["user"], "ada");
        assert!(compiled.match_line("unrelated line").is_none());
    }

    #[test]
    fn invalid_pattern_is_reported_with_the_pattern() {
        let rule = TriggerRule {
            pattern: "(".to_string(),
            scenario: "s".to_string(),
            bind: HashMap::new(),
        };
        let err = rule.compile().unwrap_err();
        assert!(matches!(err, ModelError::TriggerPattern { pattern, .. } if pattern == "("));
    }

    #[test]
    fn config_yaml_round_trip() {
        let config = TriggerConfig {
            sources: vec![WatchSource {
                path: PathBuf::from("/var/log/app.log"),
                rules: vec![TriggerRule {
                    pattern: "ERROR".to_string(),
                    scenario: "error-triage".to_string(),
                    bind: HashMap::new(),
                }],
            }],
        };

        let yaml = serde_yaml::to_string(&config).unwrap();
        let reloaded = TriggerConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, reloaded);
    }
}
