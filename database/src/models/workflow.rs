use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use wfxrs_core::{Error, Result, Workflow};

/// Workflow row - the definition column holds the workflow as submitted
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub name: String,
    pub description: Option<String>,
    pub definition: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRow {
    /// Decode the stored definition
    pub fn into_workflow(self) -> Result<Workflow> {
        serde_json::from_str(&self.definition).map_err(|e| {
            Error::Storage(format!(
                "Corrupt definition for workflow '{}': {}",
                self.name, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_workflow() {
        let row = WorkflowRow {
            name: "simple".to_string(),
            description: None,
            definition: r#"{"name":"simple","states":[{"name":"A"}],"transitions":[]}"#
                .to_string(),
            created_at: Utc::now(),
        };
        let wf = row.into_workflow().unwrap();
        assert_eq!(wf.name, "simple");
        assert!(wf.has_state("A"));
    }

    #[test]
    fn test_corrupt_definition_is_storage_error() {
        let row = WorkflowRow {
            name: "broken".to_string(),
            description: None,
            definition: "{".to_string(),
            created_at: Utc::now(),
        };
        assert!(matches!(row.into_workflow(), Err(Error::Storage(_))));
    }
}
