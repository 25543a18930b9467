// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client-side fold over [`StreamEvent`]s.
//!
//! [`PossibilityState::apply`] is synchronous and performs no I/O.  It is
//! meant to be driven by exactly one consumer in arrival order, so it needs
//! no locking.

use std::collections::{HashMap, HashSet};

use prism_model::Confidence;
use tracing::trace;

use crate::{candidate, Candidate, StreamEvent};

#[derive(Debug, Clone, Default)]
pub struct PossibilityState {
    candidates: HashMap<String, Candidate>,
    /// Candidate ids in `possibility_start` arrival order.
    order: Vec<String>,
    /// Ids removed by an `error`; later events for them are dropped.
    removed: HashSet<String>,
    failed: usize,
    finished: bool,
}

impl PossibilityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state.
    ///
    /// Events for unknown or removed candidates are ignored, as are tokens
    /// and confidence updates arriving after a candidate completed.
    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::PossibilityStart { candidate_id, model, temperature, .. } => {
                if self.removed.contains(candidate_id) || self.candidates.contains_key(candidate_id) {
                    trace!(candidate = %candidate_id, "ignoring repeated start");
                    return;
                }
                self.order.push(candidate_id.clone());
                self.candidates.insert(
                    candidate_id.clone(),
                    Candidate::started(candidate_id.clone(), model.clone(), *temperature),
                );
            }
            StreamEvent::Token { candidate_id, content } => {
                if let Some(c) = self.streaming_mut(candidate_id) {
                    c.content.push_str(content);
                }
            }
            StreamEvent::Confidence { candidate_id, confidence } => {
                if let Some(c) = self.streaming_mut(candidate_id) {
                    c.confidence = Confidence::from(Some(*confidence));
                }
            }
            StreamEvent::PossibilityComplete { candidate_id, finish_reason, usage } => {
                if let Some(c) = self.streaming_mut(candidate_id) {
                    c.is_streaming = false;
                    c.finish_reason = *finish_reason;
                    c.token_usage = *usage;
                }
            }
            StreamEvent::Error { candidate_id, message } => {
                if self.removed.contains(candidate_id) {
                    return;
                }
                trace!(candidate = %candidate_id, %message, "candidate failed");
                self.candidates.remove(candidate_id);
                self.order.retain(|id| id != candidate_id);
                self.removed.insert(candidate_id.clone());
                self.failed += 1;
            }
            StreamEvent::Done { .. } => self.finished = true,
        }
    }

    fn streaming_mut(&mut self, id: &str) -> Option<&mut Candidate> {
        match self.candidates.get_mut(id) {
            Some(c) if c.is_streaming => Some(c),
            Some(_) => {
                trace!(candidate = %id, "ignoring event after completion");
                None
            }
            None => None,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Candidate> {
        self.candidates.get(id)
    }

    /// Live candidates in arrival order.
    pub fn candidates(&self) -> Vec<&Candidate> {
        self.order.iter().filter_map(|id| self.candidates.get(id)).collect()
    }

    /// Snapshot of the live candidates, best confidence first.
    pub fn ranked(&self) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = self.candidates().into_iter().cloned().collect();
        candidate::rank(&mut out);
        out
    }

    /// Remove and return a candidate (e.g. once the user picked it).
    pub fn take(&mut self, id: &str) -> Option<Candidate> {
        let c = self.candidates.remove(id)?;
        self.order.retain(|o| o != id);
        self.removed.insert(id.to_string());
        Some(c)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    /// Candidates still receiving tokens.
    pub fn streaming_count(&self) -> usize {
        self.candidates.values().filter(|c| c.is_streaming).count()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
