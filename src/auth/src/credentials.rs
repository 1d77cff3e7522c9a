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

//! Credentials that exchange external identities for Google Cloud tokens.
//!
//! [Credentials] hold the current access token and decide when it must be
//! refreshed. The tokens come from a provider, for example the
//! [external account] token exchange.
//!
//! Applications call [Credentials::before_request] before each request.
//! The call refreshes the token if needed and sets the `authorization`
//! header. With [non-blocking refresh] enabled, tokens that are about to
//! expire are refreshed in the background while the current token is still
//! used.
//!
//! [external account]: external_account
//! [non-blocking refresh]: Credentials::with_non_blocking_refresh

pub mod certificate_config;
pub(crate) mod credential_source;
pub mod external_account;
pub mod subject_token;

pub(crate) mod external_account_sources {
    pub(crate) mod certificate_sourced;
    pub(crate) mod file_sourced;
    pub(crate) mod programmatic_sourced;
    pub(crate) mod url_sourced;
}

pub(crate) mod internal {
    pub(crate) mod impersonation;
    pub(crate) mod spaced_json;
    pub(crate) mod sts_exchange;
}

use crate::Result;
use crate::constants::DEFAULT_UNIVERSE_DOMAIN;
use crate::errors::CredentialsError;
use crate::headers_util::build_bearer_headers;
use crate::http::{RequestExecutor, SharedExecutor};
use crate::refresh_worker::RefreshWorker;
use crate::token::{Token, TokenProvider};
use crate::token_state::{self, REFRESH_THRESHOLD, TokenState};
use crate::trust_boundary::{self, TrustBoundary};
use http::{HeaderMap, Method};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// An implementation of [Refreshable] that caches its token.
///
/// Cloning a `Credentials` is cheap, all clones share the same token and
/// refresh state.
#[derive(Clone, Debug)]
pub struct Credentials {
    inner: Arc<CredentialsState>,
}

#[derive(Debug)]
struct CredentialsState {
    token_provider: Arc<dyn TokenProvider>,
    // Refreshes publish a complete token, readers never see a token without
    // its expiration.
    token: watch::Sender<Option<Token>>,
    trust_boundary: watch::Sender<Option<TrustBoundary>>,
    worker: RefreshWorker,
    non_blocking: AtomicBool,
    refresh_threshold: Duration,
    quota_project_id: Option<String>,
    universe_domain: String,
}

#[derive(Clone, Debug)]
pub(crate) struct CredentialsOptions {
    pub(crate) quota_project_id: Option<String>,
    pub(crate) universe_domain: String,
    pub(crate) non_blocking: bool,
    pub(crate) refresh_threshold: Duration,
    pub(crate) trust_boundary: Option<TrustBoundary>,
}

impl Default for CredentialsOptions {
    fn default() -> Self {
        Self {
            quota_project_id: None,
            universe_domain: DEFAULT_UNIVERSE_DOMAIN.to_string(),
            non_blocking: false,
            refresh_threshold: REFRESH_THRESHOLD,
            trust_boundary: None,
        }
    }
}

impl Credentials {
    pub(crate) fn new(token_provider: Arc<dyn TokenProvider>, options: CredentialsOptions) -> Self {
        let (token, _) = watch::channel(None);
        let (trust_boundary, _) = watch::channel(options.trust_boundary);
        Self {
            inner: Arc::new(CredentialsState {
                token_provider,
                token,
                trust_boundary,
                worker: RefreshWorker::new(),
                non_blocking: AtomicBool::new(options.non_blocking),
                refresh_threshold: options.refresh_threshold,
                quota_project_id: options.quota_project_id,
                universe_domain: options.universe_domain,
            }),
        }
    }

    /// Fetches a new token, replacing the current one.
    ///
    /// On error the current token, if any, is kept.
    pub async fn refresh(&self, executor: &dyn RequestExecutor) -> Result<()> {
        tracing::debug!("refreshing credentials");
        let boundary = self.trust_boundary();
        let token = self
            .inner
            .token_provider
            .token(executor, boundary.as_ref())
            .await?;
        self.refresh_trust_boundary(executor, &token).await;
        self.inner.token.send_replace(Some(token));
        tracing::debug!("credentials refreshed");
        Ok(())
    }

    async fn refresh_trust_boundary(&self, executor: &dyn RequestExecutor, token: &Token) {
        if self.inner.universe_domain != DEFAULT_UNIVERSE_DOMAIN || !trust_boundary::lookup_enabled()
        {
            return;
        }
        let Some(url) = self.inner.token_provider.trust_boundary_url() else {
            return;
        };
        match trust_boundary::fetch_trust_boundary(executor, &url, &token.token).await {
            Ok(boundary) => {
                self.inner.trust_boundary.send_replace(Some(boundary));
            }
            Err(e) => {
                tracing::warn!("cannot refresh the trust boundary, keeping the previous value: {e}");
            }
        }
    }

    /// Refreshes the token if needed, then sets the request headers.
    ///
    /// Without non-blocking refresh, an invalid token is refreshed before
    /// returning. With non-blocking refresh, only an [invalid] token blocks
    /// the caller. A [stale] token starts a background refresh, and the
    /// request uses the current token. If the previous background refresh
    /// failed, a stale token is refreshed before returning instead. The
    /// captured error is logged, only the new refresh error is returned.
    ///
    /// [invalid]: TokenState::Invalid
    /// [stale]: TokenState::Stale
    pub async fn before_request(
        &self,
        executor: &SharedExecutor,
        method: &Method,
        url: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        tracing::trace!(%method, url, "preparing request credentials");
        if !self.is_non_blocking() {
            if !self.valid() {
                self.refresh(executor.as_ref()).await?;
            }
            return self.apply(headers, None);
        }
        match self.token_state() {
            TokenState::Invalid => {
                if let Some(e) = self.inner.worker.take_error() {
                    tracing::debug!("background refresh failed before a blocking refresh: {e}");
                }
                self.refresh(executor.as_ref()).await?;
            }
            TokenState::Stale => {
                if let Some(e) = self.inner.worker.take_error() {
                    tracing::debug!("background refresh failed, refreshing in the foreground: {e}");
                    self.refresh(executor.as_ref()).await?;
                } else {
                    self.start_background_refresh(executor.clone());
                }
            }
            TokenState::Fresh => {}
        }
        self.apply(headers, None)
    }

    fn start_background_refresh(&self, executor: SharedExecutor) -> bool {
        let credentials = self.clone();
        self.inner
            .worker
            .start_refresh(async move { credentials.refresh(executor.as_ref()).await })
    }

    /// Waits until the current background refresh, if any, completes.
    pub async fn wait_for_background_refresh(&self) {
        self.inner.worker.wait().await
    }

    /// Sets the `authorization` header, and the quota project and trust
    /// boundary headers when they are known.
    ///
    /// If `token` is provided it is used instead of the current token.
    pub fn apply(&self, headers: &mut HeaderMap, token: Option<&str>) -> Result<()> {
        let boundary = self.trust_boundary();
        let quota_project_id = self.inner.quota_project_id.as_deref();
        if let Some(token) = token {
            return build_bearer_headers(token, quota_project_id, boundary.as_ref(), headers);
        }
        let current = self
            .inner
            .token
            .borrow()
            .as_ref()
            .map(|t| t.token.clone())
            .ok_or_else(|| {
                CredentialsError::from_msg(false, "no access token, call refresh() first")
            })?;
        build_bearer_headers(&current, quota_project_id, boundary.as_ref(), headers)
    }

    /// The current token, if any.
    pub fn token(&self) -> Option<Token> {
        self.inner.token.borrow().clone()
    }

    /// When the current token expires. `None` if there is no token, or if
    /// the token does not expire.
    pub fn expiry(&self) -> Option<Instant> {
        self.inner.token.borrow().as_ref().and_then(|t| t.expires_at)
    }

    /// A token is valid if it is not empty and has not expired.
    pub fn valid(&self) -> bool {
        token_state::valid(self.inner.token.borrow().as_ref(), Instant::now())
    }

    /// Returns `true` if the token expires within the clock skew.
    ///
    /// Credentials without a token, or with a token that does not expire,
    /// are not expired.
    pub fn expired(&self) -> bool {
        self.inner
            .token
            .borrow()
            .as_ref()
            .is_some_and(|t| token_state::expired(t, Instant::now()))
    }

    pub fn token_state(&self) -> TokenState {
        token_state::token_state(
            self.inner.token.borrow().as_ref(),
            self.inner.refresh_threshold,
            Instant::now(),
        )
    }

    /// Enables background refreshes for stale tokens.
    ///
    /// The setting is shared by all clones of these credentials.
    pub fn with_non_blocking_refresh(&self) {
        self.inner.non_blocking.store(true, Ordering::Release);
    }

    pub fn is_non_blocking(&self) -> bool {
        self.inner.non_blocking.load(Ordering::Acquire)
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        self.inner.quota_project_id.as_deref()
    }

    pub fn universe_domain(&self) -> &str {
        &self.inner.universe_domain
    }

    /// The most recent trust boundary, if any.
    pub fn trust_boundary(&self) -> Option<TrustBoundary> {
        self.inner.trust_boundary.borrow().clone()
    }

    pub(crate) fn refresh_threshold(&self) -> Duration {
        self.inner.refresh_threshold
    }
}

/// Credentials that can fetch new tokens.
#[async_trait::async_trait]
pub trait Refreshable: std::fmt::Debug + Send + Sync {
    async fn refresh(&self, executor: &dyn RequestExecutor) -> Result<()>;
}

#[async_trait::async_trait]
impl Refreshable for Credentials {
    async fn refresh(&self, executor: &dyn RequestExecutor) -> Result<()> {
        Credentials::refresh(self, executor).await
    }
}

/// Credentials whose tokens are restricted to a set of [scopes].
///
/// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
pub trait Scoped {
    /// The scopes requested by the application.
    fn scopes(&self) -> &[String];

    /// The scopes used when the application does not request any.
    fn default_scopes(&self) -> &[String];

    /// Returns `true` if neither scopes nor default scopes are configured.
    fn requires_scopes(&self) -> bool {
        self.scopes().is_empty() && self.default_scopes().is_empty()
    }

    /// Returns `true` if every scope in `scopes` is granted.
    fn has_scopes(&self, scopes: &[&str]) -> bool {
        let granted = if self.scopes().is_empty() {
            self.default_scopes()
        } else {
            self.scopes()
        };
        scopes.iter().all(|s| granted.iter().any(|g| g == s))
    }

    /// Creates new credentials with the given scopes.
    ///
    /// The new credentials do not share tokens with `self`.
    fn with_scopes(&self, scopes: Vec<String>, default_scopes: Vec<String>) -> Self
    where
        Self: Sized;
}

/// Scopes `credentials` unless they already have scopes.
pub fn with_scopes_if_required<C>(
    credentials: &C,
    scopes: Vec<String>,
    default_scopes: Vec<String>,
) -> C
where
    C: Scoped + Clone,
{
    if credentials.requires_scopes() {
        credentials.with_scopes(scopes, default_scopes)
    } else {
        credentials.clone()
    }
}

/// Credentials that can be serialized back into their configuration.
pub trait CredentialInfoProvider {
    /// The configuration of these credentials, as a JSON object.
    fn info(&self) -> serde_json::Value;

    fn to_json(&self) -> String {
        self.info().to_string()
    }
}
