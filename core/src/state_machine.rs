//! Job state machine
//!
//! Decides whether a requested status change is legal for a job's workflow
//! and where wfx's own immediate transitions take the job afterwards.
//! Never touches storage.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::types::{Eligible, Workflow};
use crate::{Error, Result};

/// Decide whether `actor` may move a job from `current` to `requested`.
///
/// Returns the state to commit. Fails with [`Error::IllegalTransition`] when
/// the workflow has no `current -> requested` edge (a state is never a
/// successor of itself) and with [`Error::Forbidden`] when edges exist but
/// none is eligible for `actor`.
pub fn decide(
    workflow: &Workflow,
    current: &str,
    requested: &str,
    actor: Eligible,
) -> Result<String> {
    let mut found = false;
    for t in workflow
        .transitions
        .iter()
        .filter(|t| t.from == current && t.to == requested)
    {
        found = true;
        if t.eligible == actor {
            debug!(workflow = %workflow.name, from = current, to = requested, %actor, "Transition allowed");
            return Ok(requested.to_string());
        }
    }

    if found {
        Err(Error::Forbidden {
            from: current.to_string(),
            to: requested.to_string(),
            actor,
        })
    } else {
        Err(Error::IllegalTransition {
            from: current.to_string(),
            to: requested.to_string(),
        })
    }
}

/// Follow wfx-eligible immediate transitions starting at `state`.
///
/// Returns the first state without an outgoing immediate edge, or `state`
/// itself when it has none.
pub fn follow_immediate(workflow: &Workflow, state: &str) -> String {
    let jumps: HashMap<&str, &str> = workflow
        .transitions
        .iter()
        .filter(|t| t.is_automatic())
        .map(|t| (t.from.as_str(), t.to.as_str()))
        .collect();

    let mut visited = HashSet::from([state]);
    let mut current = state;
    while let Some(next) = jumps.get(current) {
        // validated workflows never loop; stop rather than spin on one that does
        if !visited.insert(*next) {
            break;
        }
        current = *next;
    }

    if current != state {
        debug!(workflow = %workflow.name, from = state, to = current, "Followed immediate transitions");
    }
    current.to_string()
}
