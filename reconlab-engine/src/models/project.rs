//! Reconciliation project model
//!
//! A project pairs a target table with either a source table (`CSV` mode) or
//! the remote registry (`API` mode), plus the join/field-map configuration.

use chrono::{DateTime, Utc};
use reconlab_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Where candidate data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectMode {
    /// Source rows from a second table, matched by an exact-key join
    #[serde(rename = "CSV")]
    Csv,
    /// Candidate records fetched from the registry after initialization
    #[serde(rename = "API")]
    Api,
}

impl ProjectMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectMode::Csv => "CSV",
            ProjectMode::Api => "API",
        }
    }
}

impl FromStr for ProjectMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CSV" => Ok(ProjectMode::Csv),
            "API" => Ok(ProjectMode::Api),
            other => Err(Error::InvalidInput(format!("Unknown project mode: {}", other))),
        }
    }
}

/// Advisory project lifecycle status
///
/// Setup → Mapping → Processing → Validation → Completed. Not enforced by the
/// task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    Setup,
    Mapping,
    Processing,
    Validation,
    Completed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Setup => "Setup",
            ProjectStatus::Mapping => "Mapping",
            ProjectStatus::Processing => "Processing",
            ProjectStatus::Validation => "Validation",
            ProjectStatus::Completed => "Completed",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Setup" => Ok(ProjectStatus::Setup),
            "Mapping" => Ok(ProjectStatus::Mapping),
            "Processing" => Ok(ProjectStatus::Processing),
            "Validation" => Ok(ProjectStatus::Validation),
            "Completed" => Ok(ProjectStatus::Completed),
            other => Err(Error::InvalidInput(format!("Unknown project status: {}", other))),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join key columns
///
/// `source` is only meaningful in CSV mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Join and field-mapping configuration, stored as JSON on the project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub join_key: JoinKey,

    /// target column → source field, used for diffing and `AcceptSource` merges
    #[serde(default)]
    pub field_map: BTreeMap<String, String>,

    /// Per-project registry token (API mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl MappingConfig {
    /// Target join column, if configured and non-blank
    pub fn target_key(&self) -> Option<&str> {
        non_blank(self.join_key.target.as_deref())
    }

    /// Source join column, if configured and non-blank
    pub fn source_key(&self) -> Option<&str> {
        non_blank(self.join_key.source.as_deref())
    }

    /// Copy without secrets, for responses
    pub fn redacted(&self) -> Self {
        Self {
            api_token: None,
            ..self.clone()
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Persisted project
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub mode: ProjectMode,
    pub status: ProjectStatus,
    pub target_table: String,
    pub source_table: Option<String>,
    pub mapping: MappingConfig,
    pub created_at: DateTime<Utc>,
}

/// Project creation request
#[derive(Debug, Clone, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub mode: ProjectMode,
    pub target_table: String,
    #[serde(default)]
    pub source_table: Option<String>,
    #[serde(default)]
    pub mapping: MappingConfig,
}

impl NewProject {
    /// Creation preconditions: a name, a target table, and a source table in CSV mode
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("Project name is required".to_string()));
        }
        if self.target_table.trim().is_empty() {
            return Err(Error::InvalidInput("Target table is required".to_string()));
        }
        if self.mode == ProjectMode::Csv
            && non_blank(self.source_table.as_deref()).is_none()
        {
            return Err(Error::InvalidInput(
                "Source table is required in CSV mode".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_project(mode: ProjectMode, source_table: Option<&str>) -> NewProject {
        NewProject {
            name: "Suppliers".to_string(),
            mode,
            target_table: "suppliers".to_string(),
            source_table: source_table.map(String::from),
            mapping: MappingConfig::default(),
        }
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_string(&ProjectMode::Csv).unwrap(), "\"CSV\"");
        assert_eq!("API".parse::<ProjectMode>().unwrap(), ProjectMode::Api);
        assert!("api".parse::<ProjectMode>().is_err());
    }

    #[test]
    fn test_mapping_config_from_original_shape() {
        let config: MappingConfig = serde_json::from_str(
            r#"{"join_key": {"target": "siret"}, "field_map": {"name": "uniteLegale.denominationUniteLegale"}, "api_token": "t"}"#,
        )
        .unwrap();

        assert_eq!(config.target_key(), Some("siret"));
        assert_eq!(config.source_key(), None);
        assert_eq!(config.field_map["name"], "uniteLegale.denominationUniteLegale");
        assert!(config.redacted().api_token.is_none());
    }

    #[test]
    fn test_blank_join_keys_are_missing() {
        let config = MappingConfig {
            join_key: JoinKey {
                target: Some("  ".to_string()),
                source: Some(String::new()),
            },
            ..Default::default()
        };
        assert_eq!(config.target_key(), None);
        assert_eq!(config.source_key(), None);
    }

    #[test]
    fn test_new_project_validation() {
        assert!(new_project(ProjectMode::Api, None).validate().is_ok());
        assert!(new_project(ProjectMode::Csv, Some("registry")).validate().is_ok());

        let err = new_project(ProjectMode::Csv, None).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let mut unnamed = new_project(ProjectMode::Api, None);
        unnamed.name = " ".to_string();
        assert!(unnamed.validate().is_err());
    }
}
