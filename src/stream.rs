//! Streaming answer consumption
//!
//! Drives the incremental read loop over a server-pushed answer and reduces
//! the chunks into a finalized assistant turn. Per question the consumer
//! moves through `Idle -> AwaitingHeaders -> Streaming -> Finalized`, with
//! `Failed` and `TimedOut` as terminal error phases.
//!
//! Timeouts are two-tier: a 30s idle window only warns, a 5-minute absolute
//! ceiling cancels the read loop. Partial content that already arrived is
//! always kept.

use std::time::Duration;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::backend::{AnswerStream, Backend, StreamEvent};
use crate::error::{ChatError, Result};
use crate::session::log::TurnLog;
use crate::session::types::Role;
use crate::surface::ChatSurface;

/// Idle window before a non-fatal "still waiting" warning
pub const IDLE_WARN_SECS: u64 = 30;

/// Absolute ceiling on one answer stream
pub const CEILING_SECS: u64 = 300;

/// Turn content used when the stream times out before any data arrived
pub const TIMEOUT_MESSAGE: &str = "The answer timed out before any content arrived.";

/// Per-question consumer phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    AwaitingHeaders,
    Streaming,
    Finalized,
    Failed,
    TimedOut,
}

/// Where one answer stream ended up
#[derive(Debug)]
pub struct StreamOutcome {
    pub phase: StreamPhase,
    /// Index of the assistant turn left in the log, if one survived
    pub turn_index: Option<usize>,
    /// Error text; for `Failed` the caller surfaces it as a visible turn
    pub error: Option<String>,
}

/// Consumes one streamed answer into the turn log
pub struct StreamConsumer {
    idle_warn: Duration,
    ceiling: Duration,
}

impl Default for StreamConsumer {
    fn default() -> Self {
        Self {
            idle_warn: Duration::from_secs(IDLE_WARN_SECS),
            ceiling: Duration::from_secs(CEILING_SECS),
        }
    }
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override both windows (tests use short ones)
    pub fn with_windows(idle_warn: Duration, ceiling: Duration) -> Self {
        Self { idle_warn, ceiling }
    }

    /// Issue the answer request and consume the stream into `log`
    ///
    /// Remote failures come back inside the outcome (`Failed`), not as `Err`;
    /// the caller decides how to surface them. `Err` is reserved for local
    /// state violations.
    pub async fn run(
        &self,
        backend: &dyn Backend,
        question: &str,
        log: &mut TurnLog,
        surface: &dyn ChatSurface,
    ) -> Result<StreamOutcome> {
        // Idle -> AwaitingHeaders
        let history = log.snapshot();
        let stream = match backend.answer(question, &history).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("answer request failed: {e}");
                return Ok(StreamOutcome {
                    phase: StreamPhase::Failed,
                    turn_index: None,
                    error: Some(e.to_string()),
                });
            }
        };

        self.consume(stream, log, surface).await
    }

    /// AwaitingHeaders onward: hand off side payloads, then stream chunks
    pub async fn consume(
        &self,
        mut stream: AnswerStream,
        log: &mut TurnLog,
        surface: &dyn ChatSurface,
    ) -> Result<StreamOutcome> {
        if let Some(query) = stream.graph_query.as_deref() {
            surface.update_graph(query);
        }
        if let Some(context) = stream.context.as_deref() {
            surface.show_context(context);
        }

        // AwaitingHeaders -> Streaming
        let index = log.open_streaming(Role::Assistant)?;
        let deadline = Instant::now() + self.ceiling;
        let mut warned_idle = false;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.timed_out(&mut stream, index, log, surface);
            }
            let slice = self.idle_warn.min(deadline - now);

            match timeout(slice, stream.next_event()).await {
                Err(_) => {
                    if Instant::now() >= deadline {
                        return self.timed_out(&mut stream, index, log, surface);
                    }
                    if !warned_idle {
                        warned_idle = true;
                        warn!(
                            "no answer data for {}s, still waiting",
                            self.idle_warn.as_secs()
                        );
                        surface.muted("still waiting on the answer...");
                    }
                }
                Ok(Some(StreamEvent::Chunk(text))) => {
                    warned_idle = false;
                    log.append_chunk(index, &text)?;
                    surface.stream_chunk(&text);
                }
                Ok(Some(StreamEvent::Done)) | Ok(None) => {
                    return self.finished(index, log, surface);
                }
                Ok(Some(StreamEvent::Error(e))) => {
                    return self.dropped(index, log, surface, e);
                }
            }
        }
    }

    /// Streaming -> Finalized; empty content discards the turn instead
    fn finished(
        &self,
        index: usize,
        log: &mut TurnLog,
        surface: &dyn ChatSurface,
    ) -> Result<StreamOutcome> {
        let empty = log.get(index).is_none_or(|t| t.content.is_empty());
        if empty {
            debug!("empty answer stream, discarding assistant turn");
            log.discard_streaming(index)?;
            return Ok(StreamOutcome {
                phase: StreamPhase::Finalized,
                turn_index: None,
                error: None,
            });
        }
        log.finalize(index)?;
        surface.stream_end();
        Ok(StreamOutcome {
            phase: StreamPhase::Finalized,
            turn_index: Some(index),
            error: None,
        })
    }

    /// Ceiling expired: cancel the read loop, keep whatever arrived
    fn timed_out(
        &self,
        stream: &mut AnswerStream,
        index: usize,
        log: &mut TurnLog,
        surface: &dyn ChatSurface,
    ) -> Result<StreamOutcome> {
        stream.close();
        let secs = self.ceiling.as_secs();
        warn!("answer stream exceeded {secs}s ceiling, cancelling");

        let empty = log.get(index).is_none_or(|t| t.content.is_empty());
        if empty {
            log.append_chunk(index, TIMEOUT_MESSAGE)?;
            surface.stream_chunk(TIMEOUT_MESSAGE);
        }
        log.finalize(index)?;
        surface.stream_end();
        Ok(StreamOutcome {
            phase: StreamPhase::TimedOut,
            turn_index: Some(index),
            error: Some(ChatError::Timeout(secs).to_string()),
        })
    }

    /// Transport dropped mid-stream: partial content is kept as the answer
    fn dropped(
        &self,
        index: usize,
        log: &mut TurnLog,
        surface: &dyn ChatSurface,
        error: String,
    ) -> Result<StreamOutcome> {
        warn!("answer stream dropped mid-stream: {error}");
        let empty = log.get(index).is_none_or(|t| t.content.is_empty());
        if empty {
            log.discard_streaming(index)?;
            return Ok(StreamOutcome {
                phase: StreamPhase::Failed,
                turn_index: None,
                error: Some(error),
            });
        }
        log.finalize(index)?;
        surface.stream_end();
        Ok(StreamOutcome {
            phase: StreamPhase::Finalized,
            turn_index: Some(index),
            error: Some(error),
        })
    }
}
