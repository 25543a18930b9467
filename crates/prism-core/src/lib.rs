// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
mod cancel;
mod candidate;
mod emitter;
mod orchestrator;
mod protocol;
mod reducer;
pub mod plan;
pub mod sweep;
pub mod wire;

pub use error::{EngineError, ModelFailure};
pub use cancel::Cancellation;
pub use candidate::{new_candidate_id, rank, Candidate};
pub use emitter::{EmitSummary, EVENT_BUFFER};
pub use orchestrator::{Limits, MultiModelOutcome, Orchestrator};
pub use plan::{Job, Mode, PlanDefaults, PossibilityRequest, RequestOptions, RequestSettings};
pub use protocol::StreamEvent;
pub use reducer::PossibilityState;
pub use sweep::temperature_sweep;
