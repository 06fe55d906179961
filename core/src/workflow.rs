//! Workflow validation and initial state resolution

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::types::{Eligible, TransitionAction, Workflow};
use crate::{Error, Result};

static WORKFLOW_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-.]{1,64}$").expect("valid regex"));

static STATE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-_]{1,100}$").expect("valid regex"));

/// Validate a workflow definition before it is persisted.
///
/// Checks names, that at least one state exists, that states and groups are
/// unique, that groups do not overlap and that every transition connects two
/// declared, distinct states exactly once per actor class. An immediate
/// transition must be the only edge leaving its source state, and chains of
/// immediate transitions must not loop.
pub fn validate_workflow(workflow: &Workflow) -> Result<()> {
    if !WORKFLOW_NAME.is_match(&workflow.name) {
        return Err(Error::Validation(format!(
            "invalid workflow name '{}': expected 1-64 characters of [a-zA-Z0-9-.]",
            workflow.name
        )));
    }

    if workflow.states.is_empty() {
        return Err(Error::Validation(format!(
            "workflow '{}' must declare at least one state",
            workflow.name
        )));
    }

    let mut states = HashSet::with_capacity(workflow.states.len());
    for state in &workflow.states {
        if !STATE_NAME.is_match(&state.name) {
            return Err(Error::Validation(format!(
                "invalid state name '{}'",
                state.name
            )));
        }
        if !states.insert(state.name.as_str()) {
            return Err(Error::Validation(format!(
                "state '{}' is declared more than once",
                state.name
            )));
        }
    }

    let mut group_names = HashSet::new();
    let mut grouped: HashMap<&str, &str> = HashMap::new();
    for group in &workflow.groups {
        if !group_names.insert(group.name.as_str()) {
            return Err(Error::Validation(format!(
                "group name '{}' used multiple times",
                group.name
            )));
        }
        for state in &group.states {
            if !states.contains(state.as_str()) {
                return Err(Error::Validation(format!(
                    "group '{}' references unknown state '{}'",
                    group.name, state
                )));
            }
            if let Some(other) = grouped.insert(state.as_str(), group.name.as_str()) {
                return Err(Error::Validation(format!(
                    "state '{}' belongs to groups '{}' and '{}'",
                    state, other, group.name
                )));
            }
        }
    }

    let mut edges: HashSet<(&str, &str, Eligible)> = HashSet::new();
    for t in &workflow.transitions {
        if !states.contains(t.from.as_str()) || !states.contains(t.to.as_str()) {
            return Err(Error::Validation(format!(
                "transition {} -> {} contains unknown state name",
                t.from, t.to
            )));
        }
        if t.from == t.to {
            return Err(Error::Validation(format!(
                "transition {} -> {} is a self-loop",
                t.from, t.to
            )));
        }
        if !edges.insert((t.from.as_str(), t.to.as_str(), t.eligible)) {
            return Err(Error::Validation(format!(
                "duplicate transition: {} -> {} eligible: {}",
                t.from, t.to, t.eligible
            )));
        }
    }

    let mut outgoing: HashMap<&str, (usize, usize)> = HashMap::new();
    for t in &workflow.transitions {
        let (total, immediate) = outgoing.entry(t.from.as_str()).or_default();
        *total += 1;
        if t.action == TransitionAction::Immediate {
            *immediate += 1;
        }
    }
    for (from, (total, immediate)) in &outgoing {
        if *immediate > 1 {
            return Err(Error::Validation(format!(
                "more than one immediate action from state {}",
                from
            )));
        }
        if *immediate == 1 && *total > 1 {
            return Err(Error::Validation(format!(
                "transition with source {} contains impossible transition",
                from
            )));
        }
    }

    let jumps: HashMap<&str, &str> = workflow
        .transitions
        .iter()
        .filter(|t| t.is_automatic())
        .map(|t| (t.from.as_str(), t.to.as_str()))
        .collect();
    for start in jumps.keys() {
        let mut seen = HashSet::from([*start]);
        let mut current = *start;
        while let Some(next) = jumps.get(current) {
            if !seen.insert(*next) {
                return Err(Error::Validation(format!(
                    "immediate transitions starting at {} form a cycle",
                    start
                )));
            }
            current = *next;
        }
    }

    Ok(())
}

/// Pick the initial state for a new job.
///
/// An explicit state must be declared and, when the workflow has states
/// without incoming transitions, be one of them. Without an explicit state
/// exactly one such candidate must exist.
pub fn resolve_initial_state(workflow: &Workflow, requested: Option<&str>) -> Result<String> {
    let candidates = workflow.initial_candidates();

    match requested {
        Some(state) => {
            if !workflow.has_state(state) {
                return Err(Error::Validation(format!(
                    "state '{}' is not declared in workflow '{}'",
                    state, workflow.name
                )));
            }
            if !candidates.is_empty() && !candidates.contains(&state) {
                return Err(Error::Validation(format!(
                    "state '{}' is not an initial state of workflow '{}' (candidates: {})",
                    state,
                    workflow.name,
                    candidates.join(", ")
                )));
            }
            Ok(state.to_string())
        }
        None => match candidates.as_slice() {
            [single] => Ok(single.to_string()),
            [] => Err(Error::Validation(format!(
                "workflow '{}' has no state without incoming transitions; an initial state must be given",
                workflow.name
            ))),
            many => Err(Error::Validation(format!(
                "workflow '{}' has ambiguous initial states ({}); an initial state must be given",
                workflow.name,
                many.join(", ")
            ))),
        },
    }
}
