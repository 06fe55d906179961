//! Workflow definition store
//!
//! Validates and persists workflow definitions. Creation and deletion are
//! serialized through a store-wide lock; reads go straight to the pool.

use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use wfxrs_core::{
    validate_workflow, Error, PageLimits, PaginatedList, Pagination, Result, SortOrder, Workflow,
};

use crate::queries::{storage_error, workflows as queries};

pub struct WorkflowStore {
    pool: Pool<Sqlite>,
    limits: PageLimits,
    write_lock: Mutex<()>,
}

impl WorkflowStore {
    pub fn new(pool: Pool<Sqlite>, limits: PageLimits) -> Self {
        Self {
            pool,
            limits,
            write_lock: Mutex::new(()),
        }
    }

    /// Validate and persist a new workflow, returning it unmodified
    #[instrument(skip(self, workflow), fields(name = %workflow.name))]
    pub async fn create(&self, workflow: Workflow) -> Result<Workflow> {
        validate_workflow(&workflow).map_err(|e| {
            warn!(error = %e, "Workflow validation failed");
            e
        })?;

        let _guard = self.write_lock.lock().await;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        if queries::get_workflow(&mut conn, &workflow.name).await?.is_some() {
            return Err(Error::Conflict(format!(
                "workflow '{}' already exists",
                workflow.name
            )));
        }
        queries::insert_workflow(&mut conn, &workflow).await?;

        info!(
            states = workflow.states.len(),
            transitions = workflow.transitions.len(),
            "Created workflow"
        );
        Ok(workflow)
    }

    /// Get workflow by name
    #[instrument(skip(self))]
    pub async fn get(&self, name: &str) -> Result<Workflow> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        queries::get_workflow(&mut conn, name)
            .await?
            .ok_or_else(|| Error::workflow_not_found(name))
    }

    /// Delete an unreferenced workflow
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        if queries::get_workflow(&mut conn, name).await?.is_none() {
            return Err(Error::workflow_not_found(name));
        }

        let referencing = queries::count_jobs_for_workflow(&mut conn, name).await?;
        if referencing > 0 {
            warn!(jobs = referencing, "Refusing to delete referenced workflow");
            return Err(Error::Conflict(format!(
                "workflow '{}' is referenced by {} job(s)",
                name, referencing
            )));
        }

        // a job created since the check still trips the foreign key
        let removed = queries::delete_workflow(&mut conn, name).await?;
        if removed == 0 {
            return Err(Error::workflow_not_found(name));
        }

        info!("Deleted workflow");
        Ok(())
    }

    /// List a page of workflows ordered by name
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        offset: Option<i64>,
        limit: Option<i64>,
        sort: SortOrder,
    ) -> Result<PaginatedList<Workflow>> {
        let (offset, limit) = self.limits.resolve(offset, limit)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        let total = queries::count_workflows(&mut conn).await?;
        let content = queries::list_workflows(&mut conn, offset, limit, sort).await?;

        Ok(PaginatedList {
            pagination: Pagination {
                total,
                offset,
                limit,
            },
            content,
        })
    }
}
