use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bind::{resolve_placeholders, Variables};
use crate::error::ModelError;

/// Identifies one UI element within the target application.
///
/// The fields mirror the identifying properties exposed by the host
/// automation layer. Any field may contain `{{ variable }}` placeholders;
/// they are resolved against the execution context before the selector is
/// handed to the element locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_id: Option<String>,
}

impl Selector {
    pub fn by_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.control_type.is_none() && self.auto_id.is_none()
    }

    /// Resolve placeholders in every populated field.
    pub fn resolve(&self, vars: &Variables) -> Result<Selector, ModelError> {
        let resolve_opt = |field: &Option<String>| -> Result<Option<String>, ModelError> {
            field
                .as_deref()
                .map(|text| resolve_placeholders(text, vars))
                .transpose()
        };

        Ok(Selector {
            title: resolve_opt(&self.title)?,
            control_type: resolve_opt(&self.control_type)?,
            auto_id: resolve_opt(&self.auto_id)?,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(title) = &self.title {
            write!(f, "title='{title}'")?;
            wrote = true;
        }
        if let Some(control_type) = &self.control_type {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "control_type='{control_type}'")?;
            wrote = true;
        }
        if let Some(auto_id) = &self.auto_id {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "auto_id='{auto_id}'")?;
            wrote = true;
        }
        if !wrote {
            write!(f, "<empty selector>")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_placeholders_in_all_fields() {
        let selector = Selector {
            title: Some("Row {{ row }}".to_string()),
            control_type: Some("Button".to_string()),
            auto_id: None,
        };
        let vars = [("row".to_string(), "3".to_string())].into_iter().collect();

        let resolved = selector.resolve(&vars).unwrap();
        assert_eq!(resolved.title.as_deref(), Some("Row 3"));
        assert_eq!(resolved.control_type.as_deref(), Some("Button"));
    }

    #[test]
    fn display_includes_populated_fields_only() {
        let selector = Selector {
            title: Some("OK".to_string()),
            control_type: None,
            auto_id: Some("btn-ok".to_string()),
        };
        assert_eq!(selector.to_string(), "title='OK' auto_id='btn-ok'");
    }
}
