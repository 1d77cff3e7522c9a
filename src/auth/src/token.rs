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

//! Types and functions to work with auth [Tokens].
//!
//! [Tokens]: https://cloud.google.com/docs/authentication#token

use crate::Result;
use crate::http::RequestExecutor;
use crate::trust_boundary::TrustBoundary;
use std::collections::HashMap;
use tokio::time::Instant;

/// Represents an auth token.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The actual token string.
    ///
    /// This is the value used in `Authorization:` header.
    pub token: String,

    /// The type of the token.
    ///
    /// The most common type is `"Bearer"` but other types may appear in the
    /// future.
    pub token_type: String,

    /// The instant at which the token expires.
    ///
    /// If `None`, the token does not expire.
    ///
    /// Note that the `Instant` is not valid across processes. It is
    /// recommended to let the credentials refresh tokens within a process
    /// instead of handling expirations yourself.
    pub expires_at: Option<Instant>,

    /// Optional metadata associated with the token.
    pub metadata: Option<HashMap<String, String>>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token", &"[censored]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Fetches new tokens, one network round trip (or two) at a time.
///
/// Implementations do not cache, [Credentials] decide when to call them.
///
/// [Credentials]: crate::credentials::Credentials
#[async_trait::async_trait]
pub(crate) trait TokenProvider: std::fmt::Debug + Send + Sync {
    /// Fetches a new token.
    ///
    /// `trust_boundary` is the most recent trust boundary known to the
    /// credentials, if any.
    async fn token(
        &self,
        executor: &dyn RequestExecutor,
        trust_boundary: Option<&TrustBoundary>,
    ) -> Result<Token>;

    /// The endpoint returning the trust boundary for tokens from this provider.
    fn trust_boundary_url(&self) -> Option<String> {
        None
    }
}
