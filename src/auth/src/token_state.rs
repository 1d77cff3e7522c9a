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

//! Classifies a cached token as fresh, stale, or invalid.

use crate::token::Token;
use std::time::Duration;
use tokio::time::Instant;

/// How early tokens are refreshed, in the background, before they expire.
///
/// Covers clock skew and network latency. Credentials use this value unless
/// configured with a different threshold.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(3 * 60 + 45);

/// Tokens are considered expired this long before their real expiration.
pub const CLOCK_SKEW: Duration = Duration::from_secs(10);

/// The state of the cached token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenState {
    /// The token is valid and will remain valid for longer than the refresh
    /// threshold.
    Fresh,
    /// The token is valid, but it expires within the refresh threshold.
    ///
    /// It can be used while a refresh runs in the background.
    Stale,
    /// There is no usable token. Callers must wait for a refresh.
    Invalid,
}

/// Returns `true` if the token is expired, or expires within [CLOCK_SKEW].
///
/// Tokens without an expiration never expire.
pub(crate) fn expired(token: &Token, now: Instant) -> bool {
    match token.expires_at {
        None => false,
        Some(expires_at) => now + CLOCK_SKEW >= expires_at,
    }
}

/// Returns `true` if there is a non-empty token that is not expired.
pub(crate) fn valid(token: Option<&Token>, now: Instant) -> bool {
    token.is_some_and(|t| !t.token.is_empty() && !expired(t, now))
}

pub(crate) fn token_state(token: Option<&Token>, threshold: Duration, now: Instant) -> TokenState {
    let Some(token) = token.filter(|t| valid(Some(t), now)) else {
        return TokenState::Invalid;
    };
    match token.expires_at {
        None => TokenState::Fresh,
        Some(expires_at) if now + threshold < expires_at => TokenState::Fresh,
        Some(_) => TokenState::Stale,
    }
}
