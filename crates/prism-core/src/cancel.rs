// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cancellation controller.
//!
//! One [`Cancellation`] is created per top-level request and cloned into
//! every provider call and stream reader.  Cancelling is idempotent.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::EngineError;

#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when `deadline` elapses.  A timeout
    /// behaves exactly like an explicit [`Cancellation::cancel`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_deadline(deadline: Duration) -> Self {
        let c = Self::new();
        let token = c.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    debug!(?deadline, "request deadline reached");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
        c
    }

    /// A token cancelled together with this one, but which can also be
    /// cancelled on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self { token: self.token.child_token() }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Run `fut` unless cancellation wins first, in which case `fut` is
    /// dropped (aborting any in-flight HTTP request) and `Cancelled` is
    /// returned.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(EngineError::Cancelled),
            out = fut => out,
        }
    }
}
