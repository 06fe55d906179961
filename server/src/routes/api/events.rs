//! Job event stream
//!
//! `GET /jobs/events` subscribes to the event bus and forwards matching job
//! events as server-sent events until the client goes away or the server
//! shuts down.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};
use wfxrs_core::{Eligible, Error, EventAction, EventFilter};

use super::jobs::split_list;
use super::{ApiError, ApiResult};
use crate::state::AppState;

/// Subscription filter, each dimension a comma separated list
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EventParams {
    job_ids: Option<String>,
    client_ids: Option<String>,
    workflows: Option<String>,
    tags: Option<String>,
    actions: Option<String>,
}

impl EventParams {
    fn into_filter(self) -> wfxrs_core::Result<EventFilter> {
        let collect = |value: Option<String>| -> HashSet<String> {
            value
                .as_deref()
                .map(|v| split_list(v).collect())
                .unwrap_or_default()
        };

        let mut actions = HashSet::new();
        if let Some(value) = self.actions.as_deref() {
            for name in split_list(value) {
                let action = EventAction::from_str(&name)
                    .ok_or_else(|| Error::Validation(format!("unknown event action '{}'", name)))?;
                actions.insert(action);
            }
        }

        Ok(EventFilter {
            job_ids: collect(self.job_ids),
            client_ids: collect(self.client_ids),
            workflows: collect(self.workflows),
            tags: collect(self.tags),
            actions,
        })
    }
}

/// Open an event stream
pub(super) async fn subscribe(
    State(state): State<AppState>,
    Extension(actor): Extension<Eligible>,
    params: Result<Query<EventParams>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Query(params) = params.map_err(ApiError::from_query_rejection)?;
    let filter = params.into_filter().map_err(ApiError::from_error)?;

    let filtered = !filter.is_empty();
    let bus = state.bus.clone();
    let subscription = bus.subscribe(filter);
    let shutdown = state.shutdown.clone();
    let keep_alive = Duration::from_secs(state.config.keep_alive_secs);
    info!(subscriber_id = %subscription.id(), %actor, filtered, "Event stream opened");

    let stream = async_stream::stream! {
        let subscriber_id = subscription.id();
        yield Ok(Event::default()
            .event("subscribed")
            .data(json!({ "subscriberId": subscriber_id }).to_string()));

        let mut sequence: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => None,
                next = subscription.recv() => next,
            };
            let Some(event) = next else {
                break;
            };

            let dropped = subscription.take_dropped();
            if dropped > 0 {
                warn!(%subscriber_id, dropped, "Event stream fell behind");
                yield Ok(Event::default()
                    .event("degraded")
                    .data(json!({ "dropped": dropped }).to_string()));
            }

            match Event::default().json_data(&event) {
                Ok(message) => {
                    sequence += 1;
                    yield Ok(message.id(sequence.to_string()));
                }
                Err(e) => warn!(%subscriber_id, error = %e, "Failed to encode job event"),
            }
        }

        debug!(
            %subscriber_id,
            delivered = sequence,
            bus_closed = subscription.is_closed(),
            "Event stream closed"
        );
        bus.unsubscribe(subscription);
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive)))
}
