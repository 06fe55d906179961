//! Workflow database queries

use anyhow::Context;
use sqlx::SqliteConnection;
use tracing::instrument;
use wfxrs_core::{Error, Result, SortOrder, Workflow};

use super::{is_foreign_key_violation, is_unique_violation, storage_error};
use crate::models::WorkflowRow;

/// Insert a workflow; a duplicate name is a conflict
#[instrument(skip(conn, workflow), fields(name = %workflow.name))]
pub async fn insert_workflow(conn: &mut SqliteConnection, workflow: &Workflow) -> Result<()> {
    let definition = serde_json::to_string(workflow).context("Failed to encode workflow")?;

    sqlx::query(
        r#"
        INSERT INTO workflows (name, description, definition)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(&workflow.name)
    .bind(&workflow.description)
    .bind(definition)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            Error::Conflict(format!("workflow '{}' already exists", workflow.name))
        } else {
            storage_error("Failed to create workflow", e)
        }
    })?;

    Ok(())
}

/// Get workflow by name
#[instrument(skip(conn))]
pub async fn get_workflow(conn: &mut SqliteConnection, name: &str) -> Result<Option<Workflow>> {
    let row = sqlx::query_as::<_, WorkflowRow>(
        r#"
        SELECT name, description, definition, created_at
        FROM workflows
        WHERE name = ?
        "#,
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to get workflow")?;

    row.map(WorkflowRow::into_workflow).transpose()
}

/// Delete workflow by name, returning the number of removed rows
#[instrument(skip(conn))]
pub async fn delete_workflow(conn: &mut SqliteConnection, name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM workflows WHERE name = ?")
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                Error::Conflict(format!("workflow '{}' is referenced by jobs", name))
            } else {
                storage_error("Failed to delete workflow", e)
            }
        })?;

    Ok(result.rows_affected())
}

/// Count all workflows
pub async fn count_workflows(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflows")
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count workflows")?;

    Ok(count)
}

/// List a page of workflows ordered by name
#[instrument(skip(conn))]
pub async fn list_workflows(
    conn: &mut SqliteConnection,
    offset: i64,
    limit: i64,
    sort: SortOrder,
) -> Result<Vec<Workflow>> {
    let sql = format!(
        r#"
        SELECT name, description, definition, created_at
        FROM workflows
        ORDER BY name {}
        LIMIT ? OFFSET ?
        "#,
        sort.as_sql()
    );

    let rows = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list workflows")?;

    rows.into_iter().map(WorkflowRow::into_workflow).collect()
}

/// Count jobs referencing a workflow
pub async fn count_jobs_for_workflow(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE workflow = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count jobs for workflow")?;

    Ok(count)
}
