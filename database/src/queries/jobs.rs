//! Job database queries

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::instrument;
use wfxrs_core::{Error, History, Job, JobFilter, JobStatus, Result, SortOrder};

use super::{is_foreign_key_violation, storage_error, workflows};
use crate::models::{JobHistoryRow, JobRow};

const JOB_COLUMNS: &str =
    "seq, id, client_id, workflow, definition, state, group_name, status, stime, mtime";

/// Insert a new job row together with its tags
#[instrument(skip(conn, job), fields(id = %job.id, workflow = %job.workflow.name))]
pub async fn insert_job(conn: &mut SqliteConnection, job: &Job) -> Result<()> {
    let status = serde_json::to_string(&job.status).context("Failed to encode job status")?;
    let definition = job
        .definition
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to encode job definition")?;

    sqlx::query(
        r#"
        INSERT INTO jobs (id, client_id, workflow, definition, state, group_name, status, stime, mtime)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.id)
    .bind(&job.client_id)
    .bind(&job.workflow.name)
    .bind(definition)
    .bind(&job.status.state)
    .bind(&job.group)
    .bind(status)
    .bind(job.stime)
    .bind(job.mtime)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_foreign_key_violation(&e) {
            Error::Validation(format!("workflow '{}' does not exist", job.workflow.name))
        } else {
            storage_error("Failed to create job", e)
        }
    })?;

    add_job_tags(conn, &job.id, &job.tags).await
}

/// Get the raw job row
#[instrument(skip(conn))]
pub async fn get_job_row(conn: &mut SqliteConnection, id: &str) -> Result<Option<JobRow>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS);
    let row = sqlx::query_as::<_, JobRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get job")?;

    Ok(row)
}

/// Get the sorted tag set of a job
pub async fn get_job_tags(conn: &mut SqliteConnection, id: &str) -> Result<Vec<String>> {
    let tags: Vec<String> =
        sqlx::query_scalar("SELECT tag FROM job_tags WHERE job_id = ? ORDER BY tag")
            .bind(id)
            .fetch_all(&mut *conn)
            .await
            .context("Failed to get job tags")?;

    Ok(tags)
}

/// Get the status history of a job, oldest first
pub async fn get_job_history(conn: &mut SqliteConnection, id: &str) -> Result<Vec<History>> {
    let rows = sqlx::query_as::<_, JobHistoryRow>(
        r#"
        SELECT id, job_id, mtime, status
        FROM job_history
        WHERE job_id = ?
        ORDER BY id
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .context("Failed to get job history")?;

    rows.into_iter().map(JobHistoryRow::into_history).collect()
}

/// Load a full job record with its workflow and tags
#[instrument(skip(conn))]
pub async fn load_job(
    conn: &mut SqliteConnection,
    id: &str,
    include_history: bool,
) -> Result<Option<Job>> {
    let Some(row) = get_job_row(conn, id).await? else {
        return Ok(None);
    };

    let workflow = workflows::get_workflow(conn, &row.workflow)
        .await?
        .ok_or_else(|| {
            Error::Storage(format!(
                "job '{}' references missing workflow '{}'",
                row.id, row.workflow
            ))
        })?;
    let tags = get_job_tags(conn, id).await?;
    let history = if include_history {
        Some(get_job_history(conn, id).await?)
    } else {
        None
    };

    row.into_job(workflow, tags, history).map(Some)
}

/// Append a superseded status to the history
pub async fn insert_history(
    conn: &mut SqliteConnection,
    id: &str,
    mtime: DateTime<Utc>,
    status: &JobStatus,
) -> Result<()> {
    let status = serde_json::to_string(status).context("Failed to encode history status")?;

    sqlx::query("INSERT INTO job_history (job_id, mtime, status) VALUES (?, ?, ?)")
        .bind(id)
        .bind(mtime)
        .bind(status)
        .execute(&mut *conn)
        .await
        .context("Failed to append job history")?;

    Ok(())
}

/// Replace the current status of a job
#[instrument(skip(conn, status), fields(state = %status.state))]
pub async fn update_job_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: &JobStatus,
    group: Option<&str>,
    mtime: DateTime<Utc>,
) -> Result<()> {
    let status_json = serde_json::to_string(status).context("Failed to encode job status")?;

    sqlx::query(
        r#"
        UPDATE jobs
        SET state = ?, group_name = ?, status = ?, mtime = ?
        WHERE id = ?
        "#,
    )
    .bind(&status.state)
    .bind(group)
    .bind(status_json)
    .bind(mtime)
    .bind(id)
    .execute(&mut *conn)
    .await
    .context("Failed to update job status")?;

    Ok(())
}

/// Replace the definition of a job
pub async fn update_job_definition(
    conn: &mut SqliteConnection,
    id: &str,
    definition: Option<&JsonValue>,
    mtime: DateTime<Utc>,
) -> Result<()> {
    let definition = definition
        .map(serde_json::to_string)
        .transpose()
        .context("Failed to encode job definition")?;

    sqlx::query("UPDATE jobs SET definition = ?, mtime = ? WHERE id = ?")
        .bind(definition)
        .bind(mtime)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to update job definition")?;

    Ok(())
}

/// Bump the modification time of a job
pub async fn touch_job(conn: &mut SqliteConnection, id: &str, mtime: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE jobs SET mtime = ? WHERE id = ?")
        .bind(mtime)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to update job mtime")?;

    Ok(())
}

/// Add tags; tags already present are ignored
pub async fn add_job_tags(conn: &mut SqliteConnection, id: &str, tags: &[String]) -> Result<()> {
    for tag in tags {
        sqlx::query("INSERT OR IGNORE INTO job_tags (job_id, tag) VALUES (?, ?)")
            .bind(id)
            .bind(tag)
            .execute(&mut *conn)
            .await
            .context("Failed to add job tag")?;
    }

    Ok(())
}

/// Remove tags; tags not present are ignored
pub async fn remove_job_tags(
    conn: &mut SqliteConnection,
    id: &str,
    tags: &[String],
) -> Result<()> {
    for tag in tags {
        sqlx::query("DELETE FROM job_tags WHERE job_id = ? AND tag = ?")
            .bind(id)
            .bind(tag)
            .execute(&mut *conn)
            .await
            .context("Failed to remove job tag")?;
    }

    Ok(())
}

/// Delete a job; tags and history cascade
#[instrument(skip(conn))]
pub async fn delete_job(conn: &mut SqliteConnection, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to delete job")?;

    Ok(result.rows_affected())
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    qb.push(" WHERE 1 = 1");

    if let Some(client_id) = filter.client_id.as_ref().filter(|s| !s.is_empty()) {
        qb.push(" AND client_id = ").push_bind(client_id.clone());
    }
    if let Some(state) = filter.state.as_ref().filter(|s| !s.is_empty()) {
        qb.push(" AND state = ").push_bind(state.clone());
    }
    if let Some(workflow) = filter.workflow.as_ref().filter(|s| !s.is_empty()) {
        qb.push(" AND workflow = ").push_bind(workflow.clone());
    }
    if !filter.tags.is_empty() {
        qb.push(" AND id IN (SELECT job_id FROM job_tags WHERE tag IN (");
        let mut list = qb.separated(", ");
        for tag in &filter.tags {
            list.push_bind(tag.clone());
        }
        list.push_unseparated("))");
    }
    if !filter.groups.is_empty() {
        qb.push(" AND group_name IN (");
        let mut list = qb.separated(", ");
        for group in &filter.groups {
            list.push_bind(group.clone());
        }
        list.push_unseparated(")");
    }
}

/// Query a page of job rows plus the total number of matches
#[instrument(skip(conn))]
pub async fn query_job_rows(
    conn: &mut SqliteConnection,
    filter: &JobFilter,
    sort: SortOrder,
    offset: i64,
    limit: i64,
) -> Result<(Vec<JobRow>, i64)> {
    let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs");
    push_filters(&mut count_qb, filter);
    let total: i64 = count_qb
        .build_query_scalar::<i64>()
        .fetch_one(&mut *conn)
        .await
        .context("Failed to count jobs")?;

    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM jobs", JOB_COLUMNS));
    push_filters(&mut qb, filter);
    qb.push(format!(
        " ORDER BY stime {dir}, seq {dir} LIMIT ",
        dir = sort.as_sql()
    ));
    qb.push_bind(limit);
    qb.push(" OFFSET ");
    qb.push_bind(offset);

    let rows = qb
        .build_query_as::<JobRow>()
        .fetch_all(&mut *conn)
        .await
        .context("Failed to query jobs")?;

    Ok((rows, total))
}
