//! Core library for wfxrs
//!
//! This crate defines the workflow and job types, the error taxonomy,
//! workflow validation, the job state machine and the in-process event bus
//! shared by the storage and server crates.

pub mod error;
pub mod events;
pub mod state_machine;
pub mod types;
pub mod workflow;

// Re-exports
pub use error::{Error, Result};
pub use events::{EventAction, EventBus, EventFilter, JobEvent, Subscription};
pub use state_machine::{decide, follow_immediate};
pub use types::{
    Eligible, Group, History, Job, JobFilter, JobRequest, JobStatus, PageLimits, PaginatedList,
    Pagination, SortOrder, State, StatusUpdate, TagOp, Transition, TransitionAction, Workflow,
};
pub use workflow::{resolve_initial_state, validate_workflow};
