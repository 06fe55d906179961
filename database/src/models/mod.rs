// Database models

pub mod job;
pub mod workflow;

pub use job::*;
pub use workflow::*;
