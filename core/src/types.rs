//! Shared types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Actor class allowed to traverse a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Eligible {
    /// Management side (northbound)
    Wfx,
    /// Job-performing side (southbound)
    Client,
}

impl Eligible {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wfx => "WFX",
            Self::Client => "CLIENT",
        }
    }
}

impl fmt::Display for Eligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single workflow state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// What happens once a job reaches the source state of a transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransitionAction {
    /// Wait for the eligible actor to request the transition
    #[default]
    Wait,
    /// Taken by wfx as soon as the source state is entered
    Immediate,
}

/// Directed edge between two states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub eligible: Eligible,
    #[serde(default)]
    pub action: TransitionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, eligible: Eligible) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            eligible,
            action: TransitionAction::Wait,
            description: None,
        }
    }

    pub fn with_action(mut self, action: TransitionAction) -> Self {
        self.action = action;
        self
    }

    /// True for edges wfx follows on its own
    pub fn is_automatic(&self) -> bool {
        self.eligible == Eligible::Wfx && self.action == TransitionAction::Immediate
    }
}

/// Named grouping of states (e.g. "OPEN", "CLOSED")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub states: Vec<String>,
}

/// Workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub states: Vec<State>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Group>,
}

impl Workflow {
    /// Check whether `name` is a declared state
    pub fn has_state(&self, name: &str) -> bool {
        self.states.iter().any(|s| s.name == name)
    }

    /// Group containing `state`, if any
    pub fn group_of(&self, state: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.states.iter().any(|s| s == state))
            .map(|g| g.name.as_str())
    }

    /// States without any incoming transition, in declaration order
    pub fn initial_candidates(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|s| !self.transitions.iter().any(|t| t.to == s.name))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Current status of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: String,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,
}

impl JobStatus {
    pub fn initial(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            progress: 0,
            message: None,
            context: None,
        }
    }
}

/// Requested status change; the target state is only committed if the
/// workflow allows it
pub type StatusUpdate = JobStatus;

/// Snapshot of a previous status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub mtime: DateTime<Utc>,
    pub status: JobStatus,
}

/// Job record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub client_id: String,
    pub workflow: Workflow,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<JsonValue>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub stime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<History>>,
}

/// Input for creating a new job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub client_id: String,
    pub workflow: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub definition: Option<JsonValue>,
    /// Explicit initial state; required when the workflow's initial state is ambiguous
    #[serde(default)]
    pub state: Option<String>,
}

/// Tag mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Add,
    Remove,
}

/// Sort direction for list queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Job query filters; empty fields do not restrict the result
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub client_id: Option<String>,
    pub state: Option<String>,
    pub workflow: Option<String>,
    /// Matches jobs carrying any of these tags
    pub tags: Vec<String>,
    /// Matches jobs whose current state belongs to any of these groups
    pub groups: Vec<String>,
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// One page of a list query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedList<T> {
    pub pagination: Pagination,
    pub content: Vec<T>,
}

/// Page limits shared by all list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLimits {
    pub default_limit: i64,
    pub max_limit: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 1000,
        }
    }
}

impl PageLimits {
    /// Resolve optional request values into a valid (offset, limit) pair
    pub fn resolve(&self, offset: Option<i64>, limit: Option<i64>) -> crate::Result<(i64, i64)> {
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(crate::Error::Validation(format!(
                "offset must be non-negative, got {}",
                offset
            )));
        }
        let limit = limit.unwrap_or(self.default_limit);
        if limit < 0 {
            return Err(crate::Error::Validation(format!(
                "limit must be non-negative, got {}",
                limit
            )));
        }
        Ok((offset, limit.min(self.max_limit)))
    }
}
