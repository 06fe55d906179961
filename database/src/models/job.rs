use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use wfxrs_core::{Error, History, Job, JobStatus, Result, Workflow};

/// Job row - status and definition are stored as JSON text
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub seq: i64,
    pub id: String,
    pub client_id: String,
    pub workflow: String,
    pub definition: Option<String>,
    pub state: String,
    pub group_name: Option<String>,
    pub status: String,
    pub stime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

impl JobRow {
    /// Get status as typed value
    pub fn get_status(&self) -> Result<JobStatus> {
        serde_json::from_str(&self.status)
            .map_err(|e| Error::Storage(format!("Corrupt status for job '{}': {}", self.id, e)))
    }

    /// Get definition as JSON value
    pub fn get_definition(&self) -> Result<Option<JsonValue>> {
        self.definition
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| {
                Error::Storage(format!("Corrupt definition for job '{}': {}", self.id, e))
            })
    }

    /// Assemble the full job record
    pub fn into_job(
        self,
        workflow: Workflow,
        tags: Vec<String>,
        history: Option<Vec<History>>,
    ) -> Result<Job> {
        let status = self.get_status()?;
        let definition = self.get_definition()?;
        Ok(Job {
            id: self.id,
            client_id: self.client_id,
            workflow,
            tags,
            definition,
            status,
            group: self.group_name,
            stime: self.stime,
            mtime: self.mtime,
            history,
        })
    }
}

/// History row - one superseded status
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobHistoryRow {
    pub id: i64,
    pub job_id: String,
    pub mtime: DateTime<Utc>,
    pub status: String,
}

impl JobHistoryRow {
    pub fn into_history(self) -> Result<History> {
        let status = serde_json::from_str(&self.status).map_err(|e| {
            Error::Storage(format!(
                "Corrupt history entry {} for job '{}': {}",
                self.id, self.job_id, e
            ))
        })?;
        Ok(History {
            mtime: self.mtime,
            status,
        })
    }
}
