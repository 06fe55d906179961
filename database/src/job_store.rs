//! Job store
//!
//! Persists jobs and applies status, tag and definition changes. Every
//! mutation of a job runs under that job's entry in the lock table, commits,
//! then publishes its event before the lock is released, so subscribers see
//! the changes of one job in commit order.

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use wfxrs_core::{
    decide, follow_immediate, resolve_initial_state, Eligible, Error, EventAction, EventBus, Job, JobEvent,
    JobFilter, JobRequest, JobStatus, PageLimits, PaginatedList, Pagination, Result, SortOrder,
    StatusUpdate, TagOp, Workflow,
};

use crate::queries::{jobs, storage_error, workflows};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Held while a job is being mutated; removes the table entry once nobody
/// else is waiting for it.
struct JobLock<'a> {
    table: &'a LockTable,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for JobLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct JobStore {
    pool: Pool<Sqlite>,
    bus: EventBus,
    limits: PageLimits,
    locks: LockTable,
}

impl JobStore {
    pub fn new(pool: Pool<Sqlite>, bus: EventBus, limits: PageLimits) -> Self {
        Self {
            pool,
            bus,
            limits,
            locks: DashMap::new(),
        }
    }

    async fn lock_job(&self, id: &str) -> JobLock<'_> {
        let lock = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        JobLock {
            table: &self.locks,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of jobs that currently have a lock table entry
    #[cfg(test)]
    pub(crate) fn locked_jobs(&self) -> usize {
        self.locks.len()
    }

    async fn load(&self, id: &str, include_history: bool) -> Result<Job> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        jobs::load_job(&mut conn, id, include_history)
            .await?
            .ok_or_else(|| Error::job_not_found(id))
    }

    /// Create a job in its workflow's initial state, already advanced along
    /// any immediate transitions leaving it
    #[instrument(skip(self, request), fields(client_id = %request.client_id, workflow = %request.workflow))]
    pub async fn create(&self, request: JobRequest) -> Result<Job> {
        let tags = normalize_tags(request.tags)?;

        let workflow = {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| storage_error("Failed to acquire connection", e))?;
            workflows::get_workflow(&mut conn, &request.workflow)
                .await?
                .ok_or_else(|| {
                    Error::Validation(format!("workflow '{}' does not exist", request.workflow))
                })?
        };

        let initial = resolve_initial_state(&workflow, request.state.as_deref())?;
        let state = follow_immediate(&workflow, &initial);
        let group = workflow.group_of(&state).map(str::to_string);
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            client_id: request.client_id,
            workflow,
            tags,
            definition: request.definition,
            status: JobStatus::initial(state),
            group,
            stime: now,
            mtime: now,
            history: None,
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;
        jobs::insert_job(&mut *tx, &job).await?;
        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit job", e))?;

        info!(id = %job.id, state = %job.status.state, "Created job");
        self.bus.publish(JobEvent::from_job(EventAction::Create, &job));
        Ok(job)
    }

    /// Apply a status update on behalf of `actor`.
    ///
    /// The requested state is only committed if the workflow has an edge
    /// from the current state that `actor` may traverse. Immediate wfx
    /// transitions out of the new state are taken right away; when that moves
    /// the job on, the submitted progress, message and context are dropped.
    /// The superseded status is appended to the job history.
    #[instrument(skip(self, update), fields(requested = %update.state))]
    pub async fn update_status(
        &self,
        id: &str,
        update: StatusUpdate,
        actor: Eligible,
    ) -> Result<JobStatus> {
        let _lock = self.lock_job(id).await;
        let mut job = self.load(id, false).await?;

        let state = decide(&job.workflow, &job.status.state, &update.state, actor).map_err(|e| {
            debug!(error = %e, current = %job.status.state, "Status update rejected");
            e
        })?;
        if update.progress > 100 {
            return Err(Error::Validation(format!(
                "progress must be between 0 and 100, got {}",
                update.progress
            )));
        }

        let target = follow_immediate(&job.workflow, &state);
        let status = if target == state {
            JobStatus { state, ..update }
        } else {
            JobStatus::initial(target)
        };
        let group = job.workflow.group_of(&status.state).map(str::to_string);
        let now = Utc::now();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;
        jobs::insert_history(&mut *tx, id, job.mtime, &job.status).await?;
        jobs::update_job_status(&mut *tx, id, &status, group.as_deref(), now).await?;
        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit status update", e))?;

        info!(
            from = %job.status.state,
            to = %status.state,
            %actor,
            "Updated job status"
        );

        job.status = status;
        job.group = group;
        job.mtime = now;
        self.bus
            .publish(JobEvent::from_job(EventAction::UpdateStatus, &job));
        Ok(job.status)
    }

    /// Add or remove tags, returning the resulting sorted tag set
    #[instrument(skip(self, tags))]
    pub async fn update_tags(&self, id: &str, op: TagOp, tags: Vec<String>) -> Result<Vec<String>> {
        let tags = normalize_tags(tags)?;

        let _lock = self.lock_job(id).await;
        let mut job = self.load(id, false).await?;

        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;
        match op {
            TagOp::Add => jobs::add_job_tags(&mut *tx, id, &tags).await?,
            TagOp::Remove => jobs::remove_job_tags(&mut *tx, id, &tags).await?,
        }
        jobs::touch_job(&mut *tx, id, now).await?;
        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit tag update", e))?;

        let mut current: BTreeSet<String> = job.tags.into_iter().collect();
        let action = match op {
            TagOp::Add => {
                current.extend(tags);
                EventAction::AddTags
            }
            TagOp::Remove => {
                for tag in &tags {
                    current.remove(tag);
                }
                EventAction::DeleteTags
            }
        };

        job.tags = current.into_iter().collect();
        job.mtime = now;
        debug!(tags = ?job.tags, "Updated job tags");
        self.bus.publish(JobEvent::from_job(action, &job));
        Ok(job.tags)
    }

    /// Replace the job definition
    #[instrument(skip(self, definition))]
    pub async fn update_definition(&self, id: &str, definition: JsonValue) -> Result<JsonValue> {
        let _lock = self.lock_job(id).await;
        let mut job = self.load(id, false).await?;

        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;
        jobs::update_job_definition(&mut *tx, id, Some(&definition), now).await?;
        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit definition update", e))?;

        info!("Updated job definition");
        job.definition = Some(definition.clone());
        job.mtime = now;
        self.bus
            .publish(JobEvent::from_job(EventAction::UpdateDefinition, &job));
        Ok(definition)
    }

    /// Get a job with its embedded workflow
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str, include_history: bool) -> Result<Job> {
        self.load(id, include_history).await
    }

    /// Get the current status of a job
    pub async fn get_status(&self, id: &str) -> Result<JobStatus> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        jobs::get_job_row(&mut conn, id)
            .await?
            .ok_or_else(|| Error::job_not_found(id))?
            .get_status()
    }

    /// Get the definition of a job
    pub async fn get_definition(&self, id: &str) -> Result<Option<JsonValue>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        jobs::get_job_row(&mut conn, id)
            .await?
            .ok_or_else(|| Error::job_not_found(id))?
            .get_definition()
    }

    /// Get the sorted tag set of a job
    pub async fn get_tags(&self, id: &str) -> Result<Vec<String>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        if jobs::get_job_row(&mut conn, id).await?.is_none() {
            return Err(Error::job_not_found(id));
        }
        jobs::get_job_tags(&mut conn, id).await
    }

    /// Delete a job together with its tags and history
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _lock = self.lock_job(id).await;
        let job = self.load(id, false).await?;

        let removed = {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| storage_error("Failed to acquire connection", e))?;
            jobs::delete_job(&mut conn, id).await?
        };
        if removed == 0 {
            return Err(Error::job_not_found(id));
        }

        info!("Deleted job");
        self.bus.publish(JobEvent::from_job(EventAction::Delete, &job));
        Ok(())
    }

    /// Query a page of jobs ordered by submission time
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        filter: &JobFilter,
        sort: SortOrder,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<PaginatedList<Job>> {
        let (offset, limit) = self.limits.resolve(offset, limit)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| storage_error("Failed to acquire connection", e))?;

        let (rows, total) = jobs::query_job_rows(&mut conn, filter, sort, offset, limit).await?;

        let mut cache: HashMap<String, Workflow> = HashMap::new();
        let mut content = Vec::with_capacity(rows.len());
        for row in rows {
            let workflow = match cache.get(&row.workflow) {
                Some(wf) => wf.clone(),
                None => {
                    let wf = workflows::get_workflow(&mut conn, &row.workflow)
                        .await?
                        .ok_or_else(|| {
                            warn!(job = %row.id, workflow = %row.workflow, "Job references missing workflow");
                            Error::Storage(format!(
                                "job '{}' references missing workflow '{}'",
                                row.id, row.workflow
                            ))
                        })?;
                    cache.insert(row.workflow.clone(), wf.clone());
                    wf
                }
            };
            let tags = jobs::get_job_tags(&mut conn, &row.id).await?;
            content.push(row.into_job(workflow, tags, None)?);
        }

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

/// Deduplicate and sort tags, rejecting empty ones
fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>> {
    if tags.iter().any(|t| t.trim().is_empty()) {
        return Err(Error::Validation("tags must not be empty".to_string()));
    }
    let set: BTreeSet<String> = tags.into_iter().collect();
    Ok(set.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, WorkflowStore};
    use wfxrs_core::{EventFilter, Group, State, Transition, TransitionAction};

    fn kanban() -> Workflow {
        Workflow {
            name: "kanban".to_string(),
            description: None,
            states: ["BACKLOG", "NEW", "PROGRESS", "DONE", "CANCELED"]
                .into_iter()
                .map(State::new)
                .collect(),
            transitions: vec![
                Transition::new("BACKLOG", "NEW", Eligible::Wfx),
                Transition::new("BACKLOG", "CANCELED", Eligible::Wfx),
                Transition::new("NEW", "PROGRESS", Eligible::Client),
                Transition::new("PROGRESS", "DONE", Eligible::Client),
            ],
            groups: vec![
                Group {
                    name: "OPEN".to_string(),
                    description: None,
                    states: vec!["BACKLOG".into(), "NEW".into(), "PROGRESS".into()],
                },
                Group {
                    name: "CLOSED".to_string(),
                    description: None,
                    states: vec!["DONE".into(), "CANCELED".into()],
                },
            ],
        }
    }

    fn request(client_id: &str, tags: &[&str]) -> JobRequest {
        JobRequest {
            client_id: client_id.to_string(),
            workflow: "kanban".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            definition: None,
            state: None,
        }
    }

    fn status(state: &str) -> StatusUpdate {
        JobStatus::initial(state)
    }

    async fn setup() -> (WorkflowStore, JobStore, EventBus) {
        let db = Database::new_in_memory().await.unwrap();
        let bus = EventBus::default();
        let workflows = WorkflowStore::new(db.pool().clone(), PageLimits::default());
        workflows.create(kanban()).await.unwrap();
        let jobs = JobStore::new(db.pool().clone(), bus.clone(), PageLimits::default());
        (workflows, jobs, bus)
    }

    #[tokio::test]
    async fn test_create_job_starts_in_initial_state() {
        let (_, store, _) = setup().await;

        let job = store
            .create(request("client-1", &["b", "a", "b"]))
            .await
            .unwrap();
        assert_eq!(job.status.state, "BACKLOG");
        assert_eq!(job.status.progress, 0);
        assert_eq!(job.tags, vec!["a", "b"]);
        assert_eq!(job.group.as_deref(), Some("OPEN"));
        assert_eq!(job.stime, job.mtime);

        let fetched = store.get(&job.id, true).await.unwrap();
        assert_eq!(fetched.workflow, kanban());
        assert_eq!(fetched.tags, vec!["a", "b"]);
        assert_eq!(fetched.history, Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_create_job_rejects_unknown_workflow_and_state() {
        let (_, store, _) = setup().await;

        let mut req = request("client-1", &[]);
        req.workflow = "missing".to_string();
        assert!(matches!(store.create(req).await, Err(Error::Validation(_))));

        let mut req = request("client-1", &[]);
        req.state = Some("DONE".to_string());
        assert!(matches!(store.create(req).await, Err(Error::Validation(_))));

        let req = request("client-1", &[" "]);
        assert!(matches!(store.create(req).await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_kanban_status_updates() {
        let (_, store, _) = setup().await;
        let job = store.create(request("client-1", &[])).await.unwrap();

        assert!(matches!(
            store
                .update_status(&job.id, status("NEW"), Eligible::Client)
                .await,
            Err(Error::Forbidden { .. })
        ));

        let committed = store
            .update_status(&job.id, status("NEW"), Eligible::Wfx)
            .await
            .unwrap();
        assert_eq!(committed.state, "NEW");

        let fetched = store.get(&job.id, true).await.unwrap();
        let history = fetched.history.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status.state, "BACKLOG");
        assert_eq!(history[0].mtime, job.mtime);

        let mut update = status("PROGRESS");
        update.progress = 42;
        update.message = Some("working".to_string());
        let committed = store
            .update_status(&job.id, update, Eligible::Client)
            .await
            .unwrap();
        assert_eq!(committed.state, "PROGRESS");
        assert_eq!(committed.progress, 42);
        assert_eq!(committed.message.as_deref(), Some("working"));

        assert!(matches!(
            store
                .update_status(&job.id, status("NEW"), Eligible::Client)
                .await,
            Err(Error::IllegalTransition { .. })
        ));
        assert!(matches!(
            store
                .update_status(&job.id, status("PROGRESS"), Eligible::Client)
                .await,
            Err(Error::IllegalTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_job_unchanged() {
        let (_, store, _) = setup().await;
        let job = store.create(request("client-1", &[])).await.unwrap();

        let _ = store
            .update_status(&job.id, status("DONE"), Eligible::Wfx)
            .await
            .unwrap_err();

        let mut update = status("NEW");
        update.progress = 101;
        assert!(matches!(
            store.update_status(&job.id, update, Eligible::Wfx).await,
            Err(Error::Validation(_))
        ));

        let fetched = store.get(&job.id, true).await.unwrap();
        assert_eq!(fetched.status, job.status);
        assert_eq!(fetched.mtime, job.mtime);
        assert!(fetched.history.unwrap().is_empty());

        assert!(matches!(
            store
                .update_status("missing", status("NEW"), Eligible::Wfx)
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized() {
        let (_, store, _) = setup().await;
        let job = store.create(request("client-1", &[])).await.unwrap();
        store
            .update_status(&job.id, status("NEW"), Eligible::Wfx)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.update_status(&job.id, status("PROGRESS"), Eligible::Client),
            store.update_status(&job.id, status("PROGRESS"), Eligible::Client),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);

        let fetched = store.get(&job.id, true).await.unwrap();
        assert_eq!(fetched.status.state, "PROGRESS");
        assert_eq!(fetched.history.unwrap().len(), 2);
        assert_eq!(store.locked_jobs(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_pooled_connections() {
        let path = std::env::temp_dir().join(format!("wfxrs-{}.db", Uuid::new_v4()));
        let db = Database::new(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        db.migrate().await.unwrap();

        let bus = EventBus::default();
        WorkflowStore::new(db.pool().clone(), PageLimits::default())
            .create(kanban())
            .await
            .unwrap();
        let store = Arc::new(JobStore::new(
            db.pool().clone(),
            bus.clone(),
            PageLimits::default(),
        ));
        let job = store.create(request("client-1", &[])).await.unwrap();
        let sub = bus.subscribe(EventFilter::default());
        store
            .update_status(&job.id, status("NEW"), Eligible::Wfx)
            .await
            .unwrap();

        let writers: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                let id = job.id.clone();
                tokio::spawn(async move {
                    store
                        .update_status(&id, status("PROGRESS"), Eligible::Client)
                        .await
                })
            })
            .collect();

        let mut committed = 0;
        for writer in writers {
            match writer.await.unwrap() {
                Ok(_) => committed += 1,
                Err(e) => assert!(matches!(e, Error::IllegalTransition { .. })),
            }
        }
        assert_eq!(committed, 1);

        let fetched = store.get(&job.id, true).await.unwrap();
        assert_eq!(fetched.status.state, "PROGRESS");
        assert_eq!(fetched.history.unwrap().len(), 2);
        assert_eq!(store.locked_jobs(), 0);

        let mut events = 0;
        while sub.try_recv().is_some() {
            events += 1;
        }
        assert_eq!(events, 2);

        db.close().await.unwrap();
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_immediate_transitions_are_followed() {
        let (workflows, store, bus) = setup().await;
        let immediate = |from: &str, to: &str| {
            Transition::new(from, to, Eligible::Wfx).with_action(TransitionAction::Immediate)
        };
        workflows
            .create(Workflow {
                name: "installer".to_string(),
                description: None,
                states: ["CREATED", "INSTALL", "INSTALLING", "INSTALLED", "ACTIVATE", "ACTIVATED"]
                    .into_iter()
                    .map(State::new)
                    .collect(),
                transitions: vec![
                    immediate("CREATED", "INSTALL"),
                    Transition::new("INSTALL", "INSTALLING", Eligible::Client),
                    Transition::new("INSTALLING", "INSTALLED", Eligible::Client),
                    immediate("INSTALLED", "ACTIVATE"),
                    Transition::new("ACTIVATE", "ACTIVATED", Eligible::Client),
                ],
                groups: Vec::new(),
            })
            .await
            .unwrap();
        let sub = bus.subscribe(EventFilter::default());

        let mut req = request("client-1", &[]);
        req.workflow = "installer".to_string();
        let job = store.create(req).await.unwrap();
        assert_eq!(job.status.state, "INSTALL");

        let mut update = status("INSTALLING");
        update.progress = 50;
        let committed = store
            .update_status(&job.id, update, Eligible::Client)
            .await
            .unwrap();
        assert_eq!(committed.state, "INSTALLING");
        assert_eq!(committed.progress, 50);

        let mut update = status("INSTALLED");
        update.progress = 100;
        update.message = Some("installed".to_string());
        let committed = store
            .update_status(&job.id, update, Eligible::Client)
            .await
            .unwrap();
        assert_eq!(committed, JobStatus::initial("ACTIVATE"));

        let fetched = store.get(&job.id, true).await.unwrap();
        assert_eq!(fetched.status.state, "ACTIVATE");
        let history: Vec<_> = fetched
            .history
            .unwrap()
            .into_iter()
            .map(|h| h.status.state)
            .collect();
        assert_eq!(history, vec!["INSTALL", "INSTALLING"]);

        let mut states = Vec::new();
        while let Some(event) = sub.try_recv() {
            states.push(event.new_status.state);
        }
        assert_eq!(states, vec!["INSTALL", "INSTALLING", "ACTIVATE"]);
    }

    #[tokio::test]
    async fn test_tags_are_idempotent() {
        let (_, store, _) = setup().await;
        let job = store.create(request("client-1", &["a"])).await.unwrap();

        let tags = store
            .update_tags(&job.id, TagOp::Add, vec!["c".into(), "a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(tags, vec!["a", "b", "c"]);
        let again = store
            .update_tags(&job.id, TagOp::Add, vec!["c".into()])
            .await
            .unwrap();
        assert_eq!(again, tags);

        let tags = store
            .update_tags(&job.id, TagOp::Remove, vec!["a".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(tags, vec!["b", "c"]);
        assert_eq!(store.get_tags(&job.id).await.unwrap(), vec!["b", "c"]);

        assert!(matches!(
            store.get_tags("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_definition_and_status_accessors() {
        let (_, store, _) = setup().await;
        let job = store.create(request("client-1", &[])).await.unwrap();
        assert_eq!(store.get_definition(&job.id).await.unwrap(), None);

        let definition = serde_json::json!({"url": "http://example.com/fw.bin", "size": 1024});
        store
            .update_definition(&job.id, definition.clone())
            .await
            .unwrap();
        assert_eq!(
            store.get_definition(&job.id).await.unwrap(),
            Some(definition)
        );
        assert_eq!(store.get_status(&job.id).await.unwrap().state, "BACKLOG");

        assert!(matches!(
            store.get_status("missing").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store
                .update_definition("missing", serde_json::json!({}))
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_filters_and_sort() {
        let (_, store, _) = setup().await;
        let a = store.create(request("alpha", &["x"])).await.unwrap();
        let b = store.create(request("beta", &["y"])).await.unwrap();
        let c = store.create(request("alpha", &["z"])).await.unwrap();
        store
            .update_status(&b.id, status("CANCELED"), Eligible::Wfx)
            .await
            .unwrap();

        let all = store
            .query(&JobFilter::default(), SortOrder::Asc, None, None)
            .await
            .unwrap();
        assert_eq!(all.pagination.total, 3);
        let ids: Vec<_> = all.content.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        let desc = store
            .query(&JobFilter::default(), SortOrder::Desc, None, None)
            .await
            .unwrap();
        let ids: Vec<_> = desc.content.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        let filter = JobFilter {
            client_id: Some("alpha".to_string()),
            ..Default::default()
        };
        let page = store
            .query(&filter, SortOrder::Asc, None, None)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);

        let filter = JobFilter {
            tags: vec!["x".to_string(), "y".to_string()],
            ..Default::default()
        };
        let page = store
            .query(&filter, SortOrder::Asc, None, None)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);

        let filter = JobFilter {
            groups: vec!["CLOSED".to_string()],
            ..Default::default()
        };
        let page = store
            .query(&filter, SortOrder::Asc, None, None)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.content[0].id, b.id);

        let filter = JobFilter {
            state: Some("BACKLOG".to_string()),
            client_id: Some("alpha".to_string()),
            ..Default::default()
        };
        let page = store
            .query(&filter, SortOrder::Asc, Some(1), Some(1))
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].id, c.id);
    }

    #[tokio::test]
    async fn test_workflow_delete_blocked_while_referenced() {
        let (workflows, store, _) = setup().await;
        let job = store.create(request("client-1", &[])).await.unwrap();

        assert!(matches!(
            workflows.delete("kanban").await,
            Err(Error::Conflict(_))
        ));

        store.delete(&job.id).await.unwrap();
        assert!(matches!(
            store.get(&job.id, false).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&job.id).await,
            Err(Error::NotFound(_))
        ));

        workflows.delete("kanban").await.unwrap();
    }

    #[tokio::test]
    async fn test_events_follow_commits_in_order() {
        let (_, store, bus) = setup().await;
        let sub = bus.subscribe(EventFilter::default());

        let job = store.create(request("client-1", &["a"])).await.unwrap();
        store
            .update_status(&job.id, status("NEW"), Eligible::Wfx)
            .await
            .unwrap();
        let _ = store
            .update_status(&job.id, status("DONE"), Eligible::Wfx)
            .await
            .unwrap_err();
        store
            .update_tags(&job.id, TagOp::Add, vec!["b".into()])
            .await
            .unwrap();
        store
            .update_definition(&job.id, serde_json::json!({"v": 1}))
            .await
            .unwrap();
        store
            .update_tags(&job.id, TagOp::Remove, vec!["a".into()])
            .await
            .unwrap();
        store.delete(&job.id).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = sub.try_recv() {
            events.push(event);
        }
        let actions: Vec<_> = events.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                EventAction::Create,
                EventAction::UpdateStatus,
                EventAction::AddTags,
                EventAction::UpdateDefinition,
                EventAction::DeleteTags,
                EventAction::Delete,
            ]
        );
        assert!(events.iter().all(|e| e.job_id == job.id));
        assert_eq!(events[1].new_status.state, "NEW");
        assert_eq!(events[2].tags, vec!["a", "b"]);
        assert_eq!(events[4].tags, vec!["b"]);
    }
}
