// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SSE wire codec for [`StreamEvent`]s.
//!
//! Each event travels as one `data: <json>` line followed by a blank line.
//! The transport ends with either a `done` event, a literal `data: [DONE]`
//! line, or both; readers accept any of the three.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use prism_model::sse::{SseLineBuffer, DONE_SENTINEL};
use tracing::{debug, warn};

use crate::{Cancellation, EngineError, StreamEvent};

/// Frame one event for the wire.
pub fn encode_event(event: &StreamEvent) -> Result<String, serde_json::Error> {
    Ok(format!("data: {}\n\n", serde_json::to_string(event)?))
}

/// The transport-level terminator.
pub fn encode_done() -> String {
    format!("data: {DONE_SENTINEL}\n\n")
}

/// Incremental decoder: raw byte chunks in, parsed events out.
///
/// Partial lines are held until their newline arrives.  Malformed payloads
/// are logged and skipped.  Once a terminator is seen every later byte is
/// ignored.
#[derive(Debug, Default)]
pub struct EventReader {
    buf: SseLineBuffer,
    finished: bool,
}

impl EventReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let payloads = self.buf.push(chunk);
        self.decode(payloads)
    }

    /// Flush a trailing line that lacked a newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        let tail: Vec<String> = self.buf.finish().into_iter().collect();
        let out = self.decode(tail);
        self.finished = true;
        out
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn decode(&mut self, payloads: Vec<String>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for payload in payloads {
            if self.finished {
                break;
            }
            if payload == DONE_SENTINEL {
                debug!("transport terminator received");
                self.finished = true;
                break;
            }
            match serde_json::from_str::<StreamEvent>(&payload) {
                Ok(event) => {
                    if matches!(event, StreamEvent::Done { .. }) {
                        self.finished = true;
                    }
                    out.push(event);
                }
                Err(e) => warn!(error = %e, payload = %payload, "skipping malformed stream event"),
            }
        }
        out
    }
}

/// Drive `body` through an [`EventReader`], handing each event to
/// `on_event` in arrival order.
///
/// Returns once a terminator is seen or the body ends.  Cancellation stops
/// reading immediately and drops `body`, closing the connection.
pub async fn read_events<S, B, E, F>(
    mut body: S,
    cancel: &Cancellation,
    mut on_event: F,
) -> Result<(), EngineError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    F: FnMut(StreamEvent),
{
    let mut reader = EventReader::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            chunk = body.next() => chunk,
        };
        match chunk {
            Some(Ok(bytes)) => {
                for event in reader.push(bytes.as_ref()) {
                    on_event(event);
                }
                if reader.is_finished() {
                    return Ok(());
                }
            }
            Some(Err(e)) => return Err(EngineError::Transport(e.to_string())),
            None => {
                for event in reader.finish() {
                    on_event(event);
                }
                return Ok(());
            }
        }
    }
}
