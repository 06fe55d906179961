//! Event stream follower
//!
//! Keeps a server-sent event subscription open, reconnecting with jittered
//! exponential backoff until cancelled or out of retries.

use anyhow::bail;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconnect policy
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: f64,
    /// Relative jitter; 0.5 spreads each delay over ±50%
    pub jitter: f64,
    pub max: Duration,
    /// Consecutive failed attempts tolerated; `None` retries forever
    pub max_retries: Option<u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: 0.5,
            max: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `failures` (1-based)
    pub fn delay(&self, failures: u32, rng: &mut impl Rng) -> Duration {
        let exponent = failures.saturating_sub(1).min(64) as i32;
        let base = (self.initial.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max.as_secs_f64());
        let factor = if self.jitter > 0.0 {
            rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64((base * factor).min(self.max.as_secs_f64()))
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.max_retries.is_some_and(|max| failures > max)
    }
}

/// One server-sent event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current: SseMessage,
    has_data: bool,
}

impl SseParser {
    /// Feed a chunk, returning every message it completes
    pub fn feed(&mut self, chunk: &str) -> Vec<SseMessage> {
        self.buffer.push_str(chunk);
        let mut messages = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(&['\n', '\r'][..]);

            if line.is_empty() {
                if self.has_data || self.current.event.is_some() {
                    messages.push(std::mem::take(&mut self.current));
                }
                self.current = SseMessage::default();
                self.has_data = false;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.current.event = Some(value.to_string()),
                "id" => self.current.id = Some(value.to_string()),
                "data" => {
                    if self.has_data {
                        self.current.data.push('\n');
                    }
                    self.current.data.push_str(value);
                    self.has_data = true;
                }
                _ => {}
            }
        }

        messages
    }
}

/// Connection lifecycle of the follower
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff { failures: u32 },
}

/// Error payload returned by the server
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Follow the event stream at `url`, handing every job event to `on_event`.
///
/// Returns `Ok` when `cancel` fires and an error once the retry budget is spent.
pub async fn follow(
    client: &Client,
    url: &str,
    backoff: &Backoff,
    cancel: &CancellationToken,
    mut on_event: impl FnMut(&SseMessage),
) -> anyhow::Result<()> {
    let mut state = ConnectionState::Disconnected;
    let mut failures: u32 = 0;
    let mut response: Option<reqwest::Response> = None;

    loop {
        debug!(?state, "Event stream state");
        state = match state {
            ConnectionState::Disconnected => ConnectionState::Connecting,

            ConnectionState::Connecting => {
                let request = client
                    .get(url)
                    .header(header::ACCEPT, "text/event-stream")
                    .send();
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    result = request => result,
                };

                match result {
                    Ok(resp) if resp.status().is_success() => {
                        info!(url, "Connected to event stream");
                        failures = 0;
                        response = Some(resp);
                        ConnectionState::Streaming
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        match resp.json::<ErrorBody>().await {
                            Ok(body) => {
                                for e in body.errors {
                                    eprintln!("{}: {} ({})", status, e.message, e.code);
                                }
                            }
                            Err(_) => eprintln!("Event stream request failed with status {}", status),
                        }
                        failures += 1;
                        ConnectionState::Backoff { failures }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to connect to event stream");
                        failures += 1;
                        ConnectionState::Backoff { failures }
                    }
                }
            }

            ConnectionState::Streaming => {
                let Some(resp) = response.take() else {
                    state = ConnectionState::Connecting;
                    continue;
                };
                let mut body = resp.bytes_stream();
                let mut parser = SseParser::default();

                loop {
                    let chunk = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        chunk = body.next() => chunk,
                    };
                    match chunk {
                        Some(Ok(bytes)) => {
                            for message in parser.feed(&String::from_utf8_lossy(&bytes)) {
                                match message.event.as_deref() {
                                    Some("subscribed") => info!(data = %message.data, "Subscribed"),
                                    Some("degraded") => {
                                        warn!(data = %message.data, "Server dropped events for this stream")
                                    }
                                    _ => {
                                        debug!(id = ?message.id, "Job event");
                                        on_event(&message)
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Event stream interrupted");
                            break;
                        }
                        None => {
                            info!("Event stream closed by server");
                            break;
                        }
                    }
                }

                failures += 1;
                ConnectionState::Backoff { failures }
            }

            ConnectionState::Backoff { failures } => {
                if backoff.exhausted(failures) {
                    bail!("giving up on event stream after {} failed attempts", failures);
                }
                let delay = backoff.delay(failures, &mut rand::thread_rng());
                info!(attempt = failures, delay_ms = delay.as_millis() as u64, "Reconnecting");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(delay) => ConnectionState::Connecting,
                }
            }
        };
    }
}
