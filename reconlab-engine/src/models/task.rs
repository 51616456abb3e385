//! Reconciliation task model
//!
//! One task per target record. The target record is fixed at creation; the
//! enrichment worker only ever writes the candidate, and resolution only ever
//! writes status, decision and final record.

use reconlab_common::{Error, FlatRecord, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Candidate lookup state
///
/// Three distinct states, persisted as `candidate_state` plus an optional
/// JSON payload. "Not attempted" and "attempted, no match" are never
/// represented by the same stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "record", rename_all = "snake_case")]
pub enum CandidateState {
    /// No join or lookup has produced a result yet
    Unattempted,
    /// Join or lookup ran and found nothing
    NotFound,
    /// Matched source row or registry record
    Found(FlatRecord),
}

impl CandidateState {
    pub const UNATTEMPTED: &'static str = "unattempted";
    pub const NOT_FOUND: &'static str = "not_found";
    pub const FOUND: &'static str = "found";

    /// Value of the `candidate_state` column
    pub fn state_label(&self) -> &'static str {
        match self {
            CandidateState::Unattempted => Self::UNATTEMPTED,
            CandidateState::NotFound => Self::NOT_FOUND,
            CandidateState::Found(_) => Self::FOUND,
        }
    }

    pub fn record(&self) -> Option<&FlatRecord> {
        match self {
            CandidateState::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_unattempted(&self) -> bool {
        matches!(self, CandidateState::Unattempted)
    }

    /// Value of the `candidate_data` column
    pub fn data_column(&self) -> Result<Option<String>> {
        match self {
            CandidateState::Found(record) => Ok(Some(serde_json::to_string(record)?)),
            _ => Ok(None),
        }
    }

    /// Rebuild from the two persisted columns
    ///
    /// A stored literal `null` payload is the legacy "not yet attempted"
    /// marker and decodes to `Unattempted` whatever the state column says.
    pub fn from_columns(state: &str, data: Option<&str>) -> Result<Self> {
        if data.map(str::trim) == Some("null") {
            return Ok(CandidateState::Unattempted);
        }

        match state {
            Self::UNATTEMPTED => Ok(CandidateState::Unattempted),
            Self::NOT_FOUND => Ok(CandidateState::NotFound),
            Self::FOUND => {
                let data = data.ok_or_else(|| {
                    Error::Internal("found candidate without candidate_data".to_string())
                })?;
                let record: FlatRecord = serde_json::from_str(data)?;
                Ok(CandidateState::Found(record))
            }
            other => Err(Error::Internal(format!("Unknown candidate state: {}", other))),
        }
    }
}

/// Task review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Resolved,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Resolved => "Resolved",
            TaskStatus::Skipped => "Skipped",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "Resolved" => Ok(TaskStatus::Resolved),
            "Skipped" => Ok(TaskStatus::Skipped),
            other => Err(Error::Internal(format!("Unknown task status: {}", other))),
        }
    }
}

/// Decision applied to a task, with the data it needs
///
/// Wire form: `{"decision": "manual_edit", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "payload", rename_all = "snake_case")]
pub enum Resolution {
    /// Golden record is the target record
    KeepTarget,
    /// Golden record is the target record overridden by mapped candidate fields
    AcceptSource,
    /// Golden record is the supplied record, edited by a reviewer
    ManualEdit(FlatRecord),
    /// Golden record is the supplied record, pre-merged by the caller
    Confirmed(FlatRecord),
}

impl Resolution {
    /// Label stored in the `decision` column
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::KeepTarget => "Keep Target",
            Resolution::AcceptSource => "Accept Source",
            Resolution::ManualEdit(_) => "Manual Edit",
            Resolution::Confirmed(_) => "Confirmed",
        }
    }
}

/// Persisted task
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationTask {
    pub id: i64,
    pub project_id: i64,
    pub target_data: FlatRecord,
    pub candidate: CandidateState,
    pub status: TaskStatus,
    pub decision: Option<String>,
    pub final_data: Option<FlatRecord>,
}

/// Task produced by initialization, before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub target_data: FlatRecord,
    pub candidate: CandidateState,
}

/// Review progress counters for one project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectProgress {
    pub total: u64,
    pub pending: u64,
    pub resolved: u64,
    pub skipped: u64,
    /// Pending tasks still waiting for a registry lookup
    pub awaiting_enrichment: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> FlatRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_candidate_columns() {
        let found = CandidateState::Found(record(json!({"name": "ACME"})));
        assert_eq!(found.state_label(), "found");
        assert_eq!(found.data_column().unwrap().as_deref(), Some(r#"{"name":"ACME"}"#));

        assert_eq!(CandidateState::NotFound.data_column().unwrap(), None);
        assert_eq!(CandidateState::Unattempted.data_column().unwrap(), None);
    }

    #[test]
    fn test_candidate_from_columns() {
        assert_eq!(
            CandidateState::from_columns("unattempted", None).unwrap(),
            CandidateState::Unattempted
        );
        assert_eq!(
            CandidateState::from_columns("not_found", None).unwrap(),
            CandidateState::NotFound
        );
        assert_eq!(
            CandidateState::from_columns("found", Some(r#"{"a":1}"#)).unwrap(),
            CandidateState::Found(record(json!({"a": 1})))
        );
        assert!(CandidateState::from_columns("found", None).is_err());
        assert!(CandidateState::from_columns("maybe", None).is_err());
    }

    #[test]
    fn test_legacy_null_marker_is_unattempted() {
        assert_eq!(
            CandidateState::from_columns("found", Some("null")).unwrap(),
            CandidateState::Unattempted
        );
    }

    #[test]
    fn test_empty_found_record_is_not_not_found() {
        let empty = CandidateState::Found(FlatRecord::new());
        assert_ne!(empty, CandidateState::NotFound);
        assert_ne!(empty, CandidateState::Unattempted);
    }

    #[test]
    fn test_resolution_wire_format() {
        let keep: Resolution = serde_json::from_value(json!({"decision": "keep_target"})).unwrap();
        assert_eq!(keep, Resolution::KeepTarget);

        let edit: Resolution = serde_json::from_value(
            json!({"decision": "manual_edit", "payload": {"col1": "val1_edited"}}),
        )
        .unwrap();
        assert_eq!(edit, Resolution::ManualEdit(record(json!({"col1": "val1_edited"}))));
        assert_eq!(edit.label(), "Manual Edit");

        assert!(serde_json::from_value::<Resolution>(json!({"decision": "merge"})).is_err());
    }
}
