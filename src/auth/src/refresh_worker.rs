// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Runs at most one background refresh per credentials instance.

use crate::Result;
use crate::errors::CredentialsError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone, Debug, Default)]
pub(crate) enum WorkerState {
    #[default]
    Idle,
    Running,
    /// The last refresh finished, `Some` holds the error it captured.
    Done(Option<CredentialsError>),
}

/// A single slot for a background refresh.
///
/// Transitions are `Idle -> Running -> Done -> Idle`. Each transition is a
/// single update of the `watch` channel, so concurrent callers agree on
/// which of them started the refresh.
#[derive(Clone, Debug)]
pub(crate) struct RefreshWorker {
    state: Arc<watch::Sender<WorkerState>>,
}

impl RefreshWorker {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(WorkerState::Idle);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Spawns `refresh` unless another refresh is still running.
    ///
    /// Returns `true` if the refresh was started. An error captured by a
    /// previous refresh, and not taken by then, is logged and dropped.
    pub(crate) fn start_refresh<F>(&self, refresh: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let mut previous = WorkerState::Idle;
        let started = self.state.send_if_modified(|state| match state {
            WorkerState::Running => false,
            _ => {
                previous = std::mem::replace(state, WorkerState::Running);
                true
            }
        });
        if !started {
            return false;
        }
        if let WorkerState::Done(Some(e)) = previous {
            tracing::warn!("discarding error from a previous background refresh: {e}");
        }
        tracing::debug!("starting background refresh");
        let state = self.state.clone();
        tokio::spawn(async move {
            let result = refresh.await;
            if let Err(e) = &result {
                tracing::debug!("background refresh failed: {e}");
            }
            state.send_replace(WorkerState::Done(result.err()));
        });
        true
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), WorkerState::Running)
    }

    /// Consumes the result of a finished refresh, moving back to `Idle`.
    ///
    /// Returns the captured error, if any.
    pub(crate) fn take_error(&self) -> Option<CredentialsError> {
        let mut error = None;
        self.state.send_if_modified(|state| {
            if !matches!(state, WorkerState::Done(_)) {
                return false;
            }
            if let WorkerState::Done(e) = std::mem::take(state) {
                error = e;
            }
            true
        });
        error
    }

    /// Waits until no refresh is running.
    pub(crate) async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, the channel cannot be closed here.
        let _ = rx
            .wait_for(|state| !matches!(state, WorkerState::Running))
            .await;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> WorkerState {
        self.state.borrow().clone()
    }
}
