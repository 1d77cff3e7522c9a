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

//! [Workload identity federation] credentials.
//!
//! External account credentials exchange a subject token, issued by an
//! identity provider outside Google Cloud, for a Google Cloud access token.
//! The subject token comes from a file, a URL, an X.509 certificate, or a
//! [SubjectTokenProvider] implemented by the application. The exchange uses
//! the [Security Token Service], optionally followed by [service account
//! impersonation].
//!
//! # Example
//! ```no_run
//! # use google_cloud_auth_identity_pool::credentials::external_account::Builder;
//! # use google_cloud_auth_identity_pool::http::{ReqwestExecutor, SharedExecutor};
//! # use std::sync::Arc;
//! # tokio_test::block_on(async {
//! let config = serde_json::json!({
//!     "type": "external_account",
//!     "audience": "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider",
//!     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
//!     "token_url": "https://sts.googleapis.com/v1/token",
//!     "credential_source": {
//!         "file": "/var/run/secrets/token.jwt"
//!     }
//! });
//! let credentials = Builder::new(config)
//!     .with_scopes(["https://www.googleapis.com/auth/cloud-platform"])
//!     .with_non_blocking_refresh()
//!     .build()?;
//! let executor: SharedExecutor = Arc::new(ReqwestExecutor::new());
//! let mut headers = http::HeaderMap::new();
//! credentials
//!     .before_request(&executor, &http::Method::GET, "https://storage.googleapis.com", &mut headers)
//!     .await?;
//! # Ok::<(), anyhow::Error>(())
//! # });
//! ```
//!
//! [Workload identity federation]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [Security Token Service]: https://cloud.google.com/iam/docs/reference/sts/rest
//! [service account impersonation]: https://cloud.google.com/iam/docs/service-account-impersonation
//! [SubjectTokenProvider]: crate::credentials::subject_token::SubjectTokenProvider

use super::certificate_config::{
    CertificatePathResolver, CertificatePaths, DefaultCertificatePathResolver,
};
use super::credential_source::CredentialSource;
use super::internal::impersonation::generate_access_token;
use super::internal::sts_exchange::{ClientAuthentication, ExchangeTokenRequest, STSHandler};
use super::subject_token::{SubjectTokenContext, SubjectTokenProvider, dynamic};
use super::{CredentialInfoProvider, Credentials, CredentialsOptions, Refreshable, Scoped};
use crate::build_errors::Error as BuilderError;
use crate::constants::{
    DEFAULT_TOKEN_LIFETIME, DEFAULT_UNIVERSE_DOMAIN, EXTERNAL_ACCOUNT_TYPE, IAM_SCOPE,
};
use crate::errors::CredentialsError;
use crate::headers_util::{X_GOOG_API_CLIENT, byoid_metrics_header_value, header_value};
use crate::http::{RequestExecutor, SharedExecutor};
use crate::token::{Token, TokenProvider};
use crate::token_state::{REFRESH_THRESHOLD, TokenState};
use crate::trust_boundary::{self, TrustBoundary};
use crate::url_validation::{is_valid_impersonation_url, is_valid_token_url};
use crate::{BuildResult, Result};
use http::header::HeaderName;
use http::{HeaderMap, Method};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tokio::time::{Duration, Instant};

static WORKFORCE_AUDIENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^//iam\.googleapis\.com/locations/[^/]+/workforcePools/")
        .expect("workforce audience pattern is valid")
});

const NOT_MTLS: &str = "The credential is not configured to use mtls requests. The credential should include a \"certificate\" section in the credential source.";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct ImpersonationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_lifetime_seconds: Option<u64>,
}

/// A representation of an [external account config file].
///
/// [external account config file]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
#[derive(Deserialize, Debug, Default)]
struct ExternalAccountFile {
    #[serde(rename = "type")]
    account_type: Option<String>,
    audience: String,
    subject_token_type: String,
    token_url: Option<String>,
    token_info_url: Option<String>,
    service_account_impersonation_url: Option<String>,
    #[serde(default)]
    service_account_impersonation: ImpersonationOptions,
    client_id: Option<String>,
    client_secret: Option<String>,
    credential_source: Option<Value>,
    quota_project_id: Option<String>,
    workforce_pool_user_project: Option<String>,
    universe_domain: Option<String>,
}

/// The validated, immutable configuration of external account credentials.
#[derive(Clone, Debug)]
struct ExternalAccountConfig {
    audience: String,
    subject_token_type: String,
    token_url: String,
    token_info_url: Option<String>,
    service_account_impersonation_url: Option<String>,
    impersonation_options: ImpersonationOptions,
    client_auth: ClientAuthentication,
    workforce_pool_user_project: Option<String>,
    universe_domain: String,
    scopes: Vec<String>,
    default_scopes: Vec<String>,
    credential_source: CredentialSource,
    // Kept verbatim for `info()`.
    credential_source_info: Option<Value>,
}

impl ExternalAccountConfig {
    fn validate(&self, validate_endpoints: bool) -> BuildResult<()> {
        if self.workforce_pool_user_project.is_some() && !self.is_workforce_pool() {
            return Err(BuilderError::workforce_project(
                "workforce_pool_user_project should not be set for non-workforce pool credentials",
            ));
        }
        if !validate_endpoints {
            return Ok(());
        }
        if !is_valid_token_url(&self.token_url) {
            return Err(BuilderError::invalid_url(format!(
                "the token url {} is not a valid Security Token Service endpoint",
                self.token_url
            )));
        }
        match &self.service_account_impersonation_url {
            Some(url) if !is_valid_impersonation_url(url) => {
                Err(BuilderError::invalid_url(format!(
                    "the service account impersonation url {url} is not a valid IAM Credentials endpoint"
                )))
            }
            _ => Ok(()),
        }
    }

    fn is_workforce_pool(&self) -> bool {
        WORKFORCE_AUDIENCE.is_match(&self.audience)
    }

    /// The scopes requested by the application, or the default scopes.
    fn requested_scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            self.default_scopes.clone()
        } else {
            self.scopes.clone()
        }
    }

    fn impersonation_lifetime(&self) -> Duration {
        self.impersonation_options
            .token_lifetime_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME)
    }

    /// The email in `.../serviceAccounts/{email}:generateAccessToken`.
    fn service_account_email(&self) -> Option<&str> {
        let url = self.service_account_impersonation_url.as_deref()?;
        let start = url.rfind('/')? + 1;
        let end = url.find(":generateAccessToken")?;
        url.get(start..end)
    }

    async fn retrieve_subject_token(&self, executor: &dyn RequestExecutor) -> Result<String> {
        let context = SubjectTokenContext {
            subject_token_type: self.subject_token_type.clone(),
            audience: self.audience.clone(),
        };
        self.credential_source.subject_token(&context, executor).await
    }

    fn info(&self, quota_project_id: Option<&str>) -> Value {
        let mut info = Map::new();
        let mut insert = |key: &str, value: Option<Value>| {
            if let Some(v) = value {
                info.insert(key.to_string(), v);
            }
        };
        let string = |s: &str| Some(Value::String(s.to_string()));
        insert("type", string(EXTERNAL_ACCOUNT_TYPE));
        insert("audience", string(&self.audience));
        insert("subject_token_type", string(&self.subject_token_type));
        insert("token_url", string(&self.token_url));
        insert("token_info_url", self.token_info_url.as_deref().and_then(string));
        insert(
            "service_account_impersonation_url",
            self.service_account_impersonation_url
                .as_deref()
                .and_then(string),
        );
        if self.impersonation_options != ImpersonationOptions::default() {
            insert(
                "service_account_impersonation",
                serde_json::to_value(&self.impersonation_options).ok(),
            );
        }
        insert("client_id", self.client_auth.client_id.as_deref().and_then(string));
        insert(
            "client_secret",
            self.client_auth.client_secret.as_deref().and_then(string),
        );
        insert("credential_source", self.credential_source_info.clone());
        insert("quota_project_id", quota_project_id.and_then(string));
        insert(
            "workforce_pool_user_project",
            self.workforce_pool_user_project.as_deref().and_then(string),
        );
        insert("universe_domain", string(&self.universe_domain));
        Value::Object(info)
    }
}

#[derive(Debug)]
struct ExternalAccountTokenProvider {
    config: Arc<ExternalAccountConfig>,
}

#[async_trait::async_trait]
impl TokenProvider for ExternalAccountTokenProvider {
    async fn token(
        &self,
        executor: &dyn RequestExecutor,
        trust_boundary: Option<&TrustBoundary>,
    ) -> Result<Token> {
        let config = &self.config;
        let subject_token = config.retrieve_subject_token(executor).await?;

        let impersonation_url = config.service_account_impersonation_url.as_deref();
        let scope = match impersonation_url {
            Some(_) => vec![IAM_SCOPE.to_string()],
            None => config.requested_scopes(),
        };
        // Client authentication takes precedence over the user project.
        let extra_options = config
            .workforce_pool_user_project
            .as_ref()
            .filter(|_| !config.client_auth.is_configured())
            .map(|project| BTreeMap::from([("userProject".to_string(), project.clone())]));

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(X_GOOG_API_CLIENT),
            header_value(&byoid_metrics_header_value(
                impersonation_url.is_some(),
                config.impersonation_options.token_lifetime_seconds.is_some(),
                config.credential_source.metrics_source(),
            ))?,
        );
        let req = ExchangeTokenRequest {
            url: config.token_url.clone(),
            authentication: config.client_auth.clone(),
            headers,
            subject_token,
            subject_token_type: config.subject_token_type.clone(),
            audience: config.audience.clone(),
            scope,
            extra_options,
        };
        let response = STSHandler::exchange_token(executor, req).await?;

        match impersonation_url {
            Some(url) => {
                generate_access_token(
                    executor,
                    &response.access_token,
                    config.requested_scopes(),
                    config.impersonation_lifetime(),
                    url,
                    trust_boundary,
                )
                .await
            }
            None => {
                let lifetime = response
                    .expires_in
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TOKEN_LIFETIME);
                let expires_at = Instant::now().checked_add(lifetime).ok_or_else(|| {
                    CredentialsError::from_msg(
                        false,
                        format!(
                            "invalid expires_in in token exchange response: {}s",
                            lifetime.as_secs()
                        ),
                    )
                })?;
                Ok(Token {
                    token: response.access_token,
                    token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
                    expires_at: Some(expires_at),
                    metadata: None,
                })
            }
        }
    }

    fn trust_boundary_url(&self) -> Option<String> {
        let config = &self.config;
        match config.service_account_email() {
            Some(email) => Some(trust_boundary::service_account_lookup_url(
                email,
                &config.universe_domain,
            )),
            None => {
                trust_boundary::external_account_lookup_url(&config.audience, &config.universe_domain)
            }
        }
    }
}

/// Credentials for [workload] and [workforce] identity federation.
///
/// Create instances with [Builder] or [ProgrammaticBuilder].
///
/// [workload]: https://cloud.google.com/iam/docs/workload-identity-federation
/// [workforce]: https://cloud.google.com/iam/docs/workforce-identity-federation
#[derive(Clone, Debug)]
pub struct ExternalAccountCredentials {
    credentials: Credentials,
    config: Arc<ExternalAccountConfig>,
    options: CredentialsOptions,
}

impl ExternalAccountCredentials {
    fn new(config: ExternalAccountConfig, options: CredentialsOptions) -> Self {
        let config = Arc::new(config);
        let provider = ExternalAccountTokenProvider {
            config: config.clone(),
        };
        let credentials = Credentials::new(Arc::new(provider), options.clone());
        Self {
            credentials,
            config,
            options,
        }
    }

    /// A copy of these credentials with a different configuration, and a
    /// fresh token state.
    fn derive(&self, config: ExternalAccountConfig, mut options: CredentialsOptions) -> Self {
        options.non_blocking = self.credentials.is_non_blocking();
        options.trust_boundary = self.credentials.trust_boundary();
        Self::new(config, options)
    }

    /// The underlying [Credentials], with the token and refresh state.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Exchanges a new subject token for an access token.
    pub async fn refresh(&self, executor: &dyn RequestExecutor) -> Result<()> {
        self.credentials.refresh(executor).await
    }

    /// See [Credentials::before_request].
    pub async fn before_request(
        &self,
        executor: &SharedExecutor,
        method: &Method,
        url: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        self.credentials
            .before_request(executor, method, url, headers)
            .await
    }

    /// See [Credentials::apply].
    pub fn apply(&self, headers: &mut HeaderMap, token: Option<&str>) -> Result<()> {
        self.credentials.apply(headers, token)
    }

    pub fn token(&self) -> Option<Token> {
        self.credentials.token()
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.credentials.expiry()
    }

    pub fn valid(&self) -> bool {
        self.credentials.valid()
    }

    pub fn expired(&self) -> bool {
        self.credentials.expired()
    }

    pub fn token_state(&self) -> TokenState {
        self.credentials.token_state()
    }

    /// See [Credentials::with_non_blocking_refresh].
    pub fn with_non_blocking_refresh(&self) {
        self.credentials.with_non_blocking_refresh()
    }

    pub fn quota_project_id(&self) -> Option<&str> {
        self.credentials.quota_project_id()
    }

    pub fn universe_domain(&self) -> &str {
        &self.config.universe_domain
    }

    /// Fetches the subject token, without exchanging it.
    pub async fn retrieve_subject_token(&self, executor: &dyn RequestExecutor) -> Result<String> {
        self.config.retrieve_subject_token(executor).await
    }

    pub fn audience(&self) -> &str {
        &self.config.audience
    }

    pub fn subject_token_type(&self) -> &str {
        &self.config.subject_token_type
    }

    pub fn token_url(&self) -> &str {
        &self.config.token_url
    }

    pub fn token_info_url(&self) -> Option<&str> {
        self.config.token_info_url.as_deref()
    }

    pub fn service_account_impersonation_url(&self) -> Option<&str> {
        self.config.service_account_impersonation_url.as_deref()
    }

    /// The impersonated service account, if any.
    pub fn service_account_email(&self) -> Option<&str> {
        self.config.service_account_email()
    }

    pub fn workforce_pool_user_project(&self) -> Option<&str> {
        self.config.workforce_pool_user_project.as_deref()
    }

    /// Returns `true` if the audience is a workforce pool.
    pub fn is_workforce_pool(&self) -> bool {
        self.config.is_workforce_pool()
    }

    /// Returns `true` if the credentials represent a user, that is, a
    /// workforce pool identity without service account impersonation.
    pub fn is_user(&self) -> bool {
        self.is_workforce_pool() && self.config.service_account_impersonation_url.is_none()
    }

    /// Creates new credentials billing requests to `quota_project_id`.
    pub fn with_quota_project<S: Into<String>>(&self, quota_project_id: S) -> Self {
        let options = CredentialsOptions {
            quota_project_id: Some(quota_project_id.into()),
            ..self.options.clone()
        };
        self.derive((*self.config).clone(), options)
    }

    /// The workload certificate and key used for mTLS requests.
    ///
    /// Only credentials with a `certificate` credential source have them.
    pub fn mtls_cert_and_key_paths(&self) -> Result<CertificatePaths> {
        match self.config.credential_source.certificate() {
            Some(source) => source.cert_and_key_paths(),
            None => Err(CredentialsError::from_msg(false, NOT_MTLS)),
        }
    }
}

#[async_trait::async_trait]
impl Refreshable for ExternalAccountCredentials {
    async fn refresh(&self, executor: &dyn RequestExecutor) -> Result<()> {
        self.credentials.refresh(executor).await
    }
}

impl Scoped for ExternalAccountCredentials {
    fn scopes(&self) -> &[String] {
        &self.config.scopes
    }

    fn default_scopes(&self) -> &[String] {
        &self.config.default_scopes
    }

    fn with_scopes(&self, scopes: Vec<String>, default_scopes: Vec<String>) -> Self {
        let config = ExternalAccountConfig {
            scopes,
            default_scopes,
            ..(*self.config).clone()
        };
        self.derive(config, self.options.clone())
    }
}

impl CredentialInfoProvider for ExternalAccountCredentials {
    fn info(&self) -> Value {
        self.config.info(self.credentials.quota_project_id())
    }
}

/// Settings shared by both builders.
#[derive(Debug, Default)]
struct BuilderOptions {
    quota_project_id: Option<String>,
    scopes: Option<Vec<String>>,
    default_scopes: Option<Vec<String>>,
    universe_domain: Option<String>,
    non_blocking: bool,
    refresh_threshold: Option<Duration>,
    trust_boundary: Option<TrustBoundary>,
    validate_endpoints: bool,
}

fn build_credentials(
    file: ExternalAccountFile,
    credential_source: CredentialSource,
    options: BuilderOptions,
) -> BuildResult<ExternalAccountCredentials> {
    let universe_domain = options
        .universe_domain
        .or(file.universe_domain)
        .unwrap_or_else(|| DEFAULT_UNIVERSE_DOMAIN.to_string());
    let token_url = file
        .token_url
        .unwrap_or_else(|| format!("https://sts.{universe_domain}/v1/token"));
    let config = ExternalAccountConfig {
        audience: file.audience,
        subject_token_type: file.subject_token_type,
        token_url,
        token_info_url: file.token_info_url,
        service_account_impersonation_url: file.service_account_impersonation_url,
        impersonation_options: file.service_account_impersonation,
        client_auth: ClientAuthentication {
            client_id: file.client_id,
            client_secret: file.client_secret,
        },
        workforce_pool_user_project: file.workforce_pool_user_project,
        universe_domain: universe_domain.clone(),
        scopes: options.scopes.unwrap_or_default(),
        default_scopes: options.default_scopes.unwrap_or_default(),
        credential_source,
        credential_source_info: file.credential_source,
    };
    config.validate(options.validate_endpoints)?;
    let credentials_options = CredentialsOptions {
        quota_project_id: options.quota_project_id.or(file.quota_project_id),
        universe_domain,
        non_blocking: options.non_blocking,
        refresh_threshold: options.refresh_threshold.unwrap_or(REFRESH_THRESHOLD),
        trust_boundary: options.trust_boundary,
    };
    Ok(ExternalAccountCredentials::new(config, credentials_options))
}

/// A builder for [ExternalAccountCredentials] from an external account
/// configuration.
///
/// # Example
/// ```
/// # use google_cloud_auth_identity_pool::credentials::external_account::Builder;
/// let config = serde_json::json!({
///     "type": "external_account",
///     "audience": "//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider",
///     "subject_token_type": "urn:ietf:params:oauth:token-type:jwt",
///     "credential_source": {
///         "url": "http://169.254.169.254/metadata/identity/oauth2/token",
///         "headers": { "Metadata": "True" },
///         "format": { "type": "json", "subject_token_field_name": "access_token" }
///     }
/// });
/// let credentials = Builder::new(config)
///     .with_quota_project_id("my-quota-project")
///     .build();
/// assert!(credentials.is_ok());
/// ```
pub struct Builder {
    external_account_config: Value,
    certificate_resolver: Option<Arc<dyn CertificatePathResolver>>,
    options: BuilderOptions,
}

impl Builder {
    /// Creates a new builder using [external_account_credentials] JSON value.
    ///
    /// [external_account_credentials]: https://google.aip.dev/auth/4117#configuration-file-generation-and-usage
    pub fn new(external_account_config: Value) -> Self {
        Self {
            external_account_config,
            certificate_resolver: None,
            options: BuilderOptions::default(),
        }
    }

    /// Creates a new builder from the configuration file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> BuildResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(BuilderError::loading)?;
        let value: Value = serde_json::from_str(&contents).map_err(BuilderError::parsing)?;
        Ok(Self::new(value))
    }

    /// Sets the [quota project] for these credentials.
    ///
    /// Overrides the `quota_project_id` in the configuration, if any.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.options.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Sets the [scopes] for these credentials.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the scopes used when no scopes are set.
    pub fn with_default_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.default_scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Overrides the universe domain, `googleapis.com` by default.
    pub fn with_universe_domain<S: Into<String>>(mut self, universe_domain: S) -> Self {
        self.options.universe_domain = Some(universe_domain.into());
        self
    }

    /// Refreshes stale tokens in the background.
    pub fn with_non_blocking_refresh(mut self) -> Self {
        self.options.non_blocking = true;
        self
    }

    /// Overrides how long before expiration a token becomes stale.
    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.options.refresh_threshold = Some(threshold);
        self
    }

    /// Sets the initial trust boundary.
    pub fn with_trust_boundary(mut self, trust_boundary: TrustBoundary) -> Self {
        self.options.trust_boundary = Some(trust_boundary);
        self
    }

    /// Overrides how `certificate` credential sources find the workload
    /// certificate and key.
    pub fn with_certificate_resolver(mut self, resolver: Arc<dyn CertificatePathResolver>) -> Self {
        self.certificate_resolver = Some(resolver);
        self
    }

    /// Rejects token and impersonation endpoints outside the Google Cloud
    /// domains.
    pub fn with_endpoint_validation(mut self, enabled: bool) -> Self {
        self.options.validate_endpoints = enabled;
        self
    }

    /// Returns an [ExternalAccountCredentials] instance with the configured
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if the configuration cannot be deserialized,
    /// if the credential source is invalid, if `workforce_pool_user_project`
    /// is set for a workload pool, or if endpoint validation is enabled and
    /// an endpoint is not valid.
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        let file: ExternalAccountFile =
            serde_json::from_value(self.external_account_config).map_err(BuilderError::parsing)?;
        if let Some(t) = file.account_type.as_deref().filter(|t| *t != EXTERNAL_ACCOUNT_TYPE) {
            return Err(BuilderError::parsing(format!(
                "expected an {EXTERNAL_ACCOUNT_TYPE} configuration, got {t}"
            )));
        }
        let resolver: Arc<dyn CertificatePathResolver> = match self.certificate_resolver {
            Some(r) => r,
            None => Arc::new(DefaultCertificatePathResolver),
        };
        let source = CredentialSource::from_config(file.credential_source.as_ref(), None, resolver)?;
        build_credentials(file, source, self.options)
    }
}

/// A builder for [ExternalAccountCredentials] that uses an application
/// provided [SubjectTokenProvider].
///
/// # Example
///
/// ```
/// # use google_cloud_auth_identity_pool::credentials::external_account::ProgrammaticBuilder;
/// # use google_cloud_auth_identity_pool::credentials::subject_token::{
/// #     Builder as SubjectTokenBuilder, SubjectToken, SubjectTokenContext, SubjectTokenProvider,
/// # };
/// # use google_cloud_auth_identity_pool::errors::CredentialsError;
/// # use google_cloud_auth_identity_pool::http::RequestExecutor;
/// # use std::sync::Arc;
/// #[derive(Debug)]
/// struct MyTokenProvider;
///
/// impl SubjectTokenProvider for MyTokenProvider {
///     type Error = CredentialsError;
///     async fn subject_token(
///         &self,
///         _context: &SubjectTokenContext,
///         _executor: &dyn RequestExecutor,
///     ) -> Result<SubjectToken, Self::Error> {
///         Ok(SubjectTokenBuilder::new("my-programmatic-token").build())
///     }
/// }
///
/// let credentials = ProgrammaticBuilder::new(Arc::new(MyTokenProvider))
///     .with_audience("//iam.googleapis.com/projects/123/locations/global/workloadIdentityPools/my-pool/providers/my-provider")
///     .with_subject_token_type("urn:ietf:params:oauth:token-type:jwt")
///     .with_scopes(["https://www.googleapis.com/auth/devstorage.read_only"])
///     .build();
/// assert!(credentials.is_ok());
/// ```
///
/// [SubjectTokenProvider]: crate::credentials::subject_token::SubjectTokenProvider
pub struct ProgrammaticBuilder {
    subject_token_provider: Arc<dyn dynamic::SubjectTokenProvider>,
    audience: Option<String>,
    subject_token_type: Option<String>,
    token_url: Option<String>,
    token_info_url: Option<String>,
    service_account_impersonation_url: Option<String>,
    token_lifetime_seconds: Option<u64>,
    client_id: Option<String>,
    client_secret: Option<String>,
    workforce_pool_user_project: Option<String>,
    options: BuilderOptions,
}

impl ProgrammaticBuilder {
    /// Creates a new builder that uses `subject_token_provider` to fetch the
    /// third-party subject token.
    pub fn new<T>(subject_token_provider: Arc<T>) -> Self
    where
        T: SubjectTokenProvider + 'static,
    {
        Self {
            subject_token_provider,
            audience: None,
            subject_token_type: None,
            token_url: None,
            token_info_url: None,
            service_account_impersonation_url: None,
            token_lifetime_seconds: None,
            client_id: None,
            client_secret: None,
            workforce_pool_user_project: None,
            options: BuilderOptions::default(),
        }
    }

    /// Sets the required audience for the token exchange.
    ///
    /// This is the resource name for the workload identity pool and the provider
    /// identifier in that pool.
    pub fn with_audience<S: Into<String>>(mut self, audience: S) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Sets the required subject token type.
    ///
    /// This is the STS subject token type defined by RFC 8693 (OAuth 2.0 Token Exchange).
    pub fn with_subject_token_type<S: Into<String>>(mut self, subject_token_type: S) -> Self {
        self.subject_token_type = Some(subject_token_type.into());
        self
    }

    /// Sets the token URL for the STS token exchange.
    ///
    /// Defaults to `https://sts.{universe_domain}/v1/token`.
    pub fn with_token_url<S: Into<String>>(mut self, token_url: S) -> Self {
        self.token_url = Some(token_url.into());
        self
    }

    pub fn with_token_info_url<S: Into<String>>(mut self, token_info_url: S) -> Self {
        self.token_info_url = Some(token_info_url.into());
        self
    }

    /// Sets the URL to impersonate a service account after the exchange.
    pub fn with_service_account_impersonation_url<S: Into<String>>(mut self, url: S) -> Self {
        self.service_account_impersonation_url = Some(url.into());
        self
    }

    /// Sets the lifetime of impersonated tokens, one hour by default.
    pub fn with_token_lifetime_seconds(mut self, seconds: u64) -> Self {
        self.token_lifetime_seconds = Some(seconds);
        self
    }

    /// Sets the optional client ID for client authentication.
    pub fn with_client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the optional client secret for client authentication.
    pub fn with_client_secret<S: Into<String>>(mut self, client_secret: S) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the project billed for workforce pool requests.
    pub fn with_workforce_pool_user_project<S: Into<String>>(mut self, project: S) -> Self {
        self.workforce_pool_user_project = Some(project.into());
        self
    }

    /// Sets the optional [quota project] for these credentials.
    ///
    /// [quota project]: https://cloud.google.com/docs/quotas/quota-project
    pub fn with_quota_project_id<S: Into<String>>(mut self, quota_project_id: S) -> Self {
        self.options.quota_project_id = Some(quota_project_id.into());
        self
    }

    /// Sets the [scopes] for these credentials.
    ///
    /// [scopes]: https://developers.google.com/identity/protocols/oauth2/scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    /// Sets the scopes used when no scopes are set.
    pub fn with_default_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.default_scopes = Some(scopes.into_iter().map(|s| s.into()).collect());
        self
    }

    pub fn with_universe_domain<S: Into<String>>(mut self, universe_domain: S) -> Self {
        self.options.universe_domain = Some(universe_domain.into());
        self
    }

    /// Refreshes stale tokens in the background.
    pub fn with_non_blocking_refresh(mut self) -> Self {
        self.options.non_blocking = true;
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.options.refresh_threshold = Some(threshold);
        self
    }

    pub fn with_trust_boundary(mut self, trust_boundary: TrustBoundary) -> Self {
        self.options.trust_boundary = Some(trust_boundary);
        self
    }

    /// Rejects token and impersonation endpoints outside the Google Cloud
    /// domains.
    pub fn with_endpoint_validation(mut self, enabled: bool) -> Self {
        self.options.validate_endpoints = enabled;
        self
    }

    /// Returns an [ExternalAccountCredentials] instance with the configured
    /// settings.
    ///
    /// # Errors
    ///
    /// Returns a [BuilderError] if the audience or the subject token type
    /// are missing, or if the configuration is otherwise invalid.
    pub fn build(self) -> BuildResult<ExternalAccountCredentials> {
        let audience = self
            .audience
            .ok_or_else(|| BuilderError::missing_field("audience"))?;
        let subject_token_type = self
            .subject_token_type
            .ok_or_else(|| BuilderError::missing_field("subject_token_type"))?;
        let file = ExternalAccountFile {
            audience,
            subject_token_type,
            token_url: self.token_url,
            token_info_url: self.token_info_url,
            service_account_impersonation_url: self.service_account_impersonation_url,
            service_account_impersonation: ImpersonationOptions {
                token_lifetime_seconds: self.token_lifetime_seconds,
            },
            client_id: self.client_id,
            client_secret: self.client_secret,
            workforce_pool_user_project: self.workforce_pool_user_project,
            ..ExternalAccountFile::default()
        };
        let source = CredentialSource::from_config(
            None,
            Some(self.subject_token_provider),
            Arc::new(DefaultCertificatePathResolver),
        )?;
        build_credentials(file, source, self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ACCESS_TOKEN_TYPE, JWT_TOKEN_TYPE, MTLS_TOKEN_TYPE};
    use crate::credentials::certificate_config::CertificateConfigLocation;
    use crate::credentials::subject_token::{Builder as SubjectTokenBuilder, SubjectToken};
    use crate::headers_util::{
        ACCESS_TOKEN_REQUEST_TYPE, IMPERSONATED_CREDENTIAL_TYPE, metrics_header_value,
    };
    use crate::http::tests::json_response;
    use crate::http::{HttpRequest, HttpResponse};
    use serde_json::json;
    use serial_test::parallel;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use time::OffsetDateTime;

    type TestResult = anyhow::Result<()>;

    const DATA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data");
    const TEXT_FILE_SUBJECT_TOKEN: &str = "HEADER.SIMULATED_PAYLOAD.SIGNATURE";
    const JSON_FILE_SUBJECT_TOKEN: &str = "HEADER.SIMULATED_JWT_PAYLOAD.SIGNATURE";
    const TOKEN_URL: &str = "https://sts.googleapis.com/v1/token";
    const TOKEN_INFO_URL: &str = "https://sts.googleapis.com/v1/introspect";
    const AUDIENCE: &str = "//iam.googleapis.com/projects/123456/locations/global/workloadIdentityPools/POOL_ID/providers/PROVIDER_ID";
    const WORKFORCE_AUDIENCE: &str =
        "//iam.googleapis.com/locations/global/workforcePools/POOL_ID/providers/PROVIDER_ID";
    const WORKFORCE_SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:id_token";
    const WORKFORCE_POOL_USER_PROJECT: &str = "WORKFORCE_POOL_USER_PROJECT_NUMBER";
    const SERVICE_ACCOUNT_EMAIL: &str = "service-1234@service-name.iam.gserviceaccount.com";
    const BASIC_AUTH_ENCODING: &str = "dXNlcm5hbWU6cGFzc3dvcmQ=";

    fn impersonation_url() -> String {
        format!(
            "https://us-east1-iamcredentials.googleapis.com/v1/projects/-/serviceAccounts/{SERVICE_ACCOUNT_EMAIL}:generateAccessToken"
        )
    }

    fn text_file_source() -> Value {
        json!({"file": format!("{DATA}/external_subject_token.txt")})
    }

    fn json_file_source() -> Value {
        json!({
            "file": format!("{DATA}/external_subject_token.json"),
            "format": {"type": "json", "subject_token_field_name": "access_token"},
        })
    }

    fn config(credential_source: Value) -> Value {
        json!({
            "type": "external_account",
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "token_url": TOKEN_URL,
            "token_info_url": TOKEN_INFO_URL,
            "credential_source": credential_source,
        })
    }

    /// Returns canned responses in order and records the requests.
    #[derive(Debug, Default)]
    struct FakeExecutor {
        responses: Mutex<VecDeque<(u16, Value)>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl FakeExecutor {
        fn new(responses: Vec<(u16, Value)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RequestExecutor for FakeExecutor {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.requests.lock().unwrap().push(request);
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            json_response(status, body)
        }
    }

    fn sts_response() -> (u16, Value) {
        (
            200,
            json!({
                "access_token": "ACCESS_TOKEN",
                "issued_token_type": ACCESS_TOKEN_TYPE,
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "scope1 scope2",
            }),
        )
    }

    fn impersonation_response() -> anyhow::Result<(u16, Value)> {
        let expire_time = (OffsetDateTime::now_utc() + time::Duration::hours(1))
            .format(&time::format_description::well_known::Rfc3339)?;
        Ok((
            200,
            json!({"accessToken": "SA_ACCESS_TOKEN", "expireTime": expire_time}),
        ))
    }

    fn form(request: &HttpRequest) -> HashMap<String, String> {
        let body = request.body.clone().unwrap_or_default();
        url::form_urlencoded::parse(&body).into_owned().collect()
    }

    fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
        request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn want_form(
        audience: &str,
        subject_token_type: &str,
        scope: &str,
        subject_token: &str,
    ) -> HashMap<String, String> {
        [
            ("grant_type", "urn:ietf:params:oauth:grant-type:token-exchange"),
            ("audience", audience),
            ("requested_token_type", ACCESS_TOKEN_TYPE),
            ("scope", scope),
            ("subject_token", subject_token),
            ("subject_token_type", subject_token_type),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[derive(Debug)]
    struct FixedResolver;

    impl CertificatePathResolver for FixedResolver {
        fn resolve(&self, _location: &CertificateConfigLocation) -> Result<CertificatePaths> {
            Ok(CertificatePaths {
                cert_path: format!("{DATA}/public_cert.pem"),
                key_path: format!("{DATA}/privatekey.pem"),
            })
        }
    }

    #[derive(Debug)]
    struct TestProvider {
        expected: SubjectTokenContext,
    }

    impl SubjectTokenProvider for TestProvider {
        type Error = CredentialsError;

        async fn subject_token(
            &self,
            context: &SubjectTokenContext,
            _executor: &dyn RequestExecutor,
        ) -> std::result::Result<SubjectToken, Self::Error> {
            if context != &self.expected {
                return Err(CredentialsError::from_msg(false, "unexpected context"));
            }
            Ok(SubjectTokenBuilder::new("supplied-token").build())
        }
    }

    #[test]
    fn build_defaults() -> TestResult {
        let value = json!({
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "credential_source": text_file_source(),
        });
        let credentials = Builder::new(value).build()?;
        assert_eq!(credentials.token_url(), TOKEN_URL);
        assert_eq!(credentials.token_info_url(), None);
        assert_eq!(credentials.universe_domain(), DEFAULT_UNIVERSE_DOMAIN);
        assert_eq!(credentials.quota_project_id(), None);
        assert!(credentials.requires_scopes());
        assert!(!credentials.is_workforce_pool());
        assert!(!credentials.is_user());
        assert_eq!(credentials.service_account_email(), None);
        assert!(credentials.token().is_none());
        assert!(!credentials.credentials().is_non_blocking());
        Ok(())
    }

    #[test]
    fn build_universe_domain() -> TestResult {
        let value = json!({
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "credential_source": text_file_source(),
            "universe_domain": "testdomain.org",
        });
        let credentials = Builder::new(value.clone()).build()?;
        assert_eq!(credentials.token_url(), "https://sts.testdomain.org/v1/token");
        assert_eq!(credentials.universe_domain(), "testdomain.org");

        let credentials = Builder::new(value)
            .with_universe_domain("override.example.com")
            .build()?;
        assert_eq!(
            credentials.token_url(),
            "https://sts.override.example.com/v1/token"
        );
        Ok(())
    }

    #[test]
    fn build_parsing_errors() {
        let err = Builder::new(json!({"audience": AUDIENCE})).build().unwrap_err();
        assert!(err.is_parsing(), "{err:?}");

        let mut value = config(text_file_source());
        value["type"] = json!("service_account");
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_parsing(), "{err:?}");
    }

    #[test]
    fn build_invalid_source() {
        let err = Builder::new(config(json!({"environment_id": "aws1"})))
            .build()
            .unwrap_err();
        assert!(err.is_invalid_source(), "{err:?}");

        let mut value = config(Value::Null);
        value
            .as_object_mut()
            .map(|o| o.remove("credential_source"));
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_invalid_source(), "{err:?}");
    }

    #[test]
    fn from_file() -> TestResult {
        let file = tempfile::NamedTempFile::new()?;
        std::fs::write(file.path(), config(text_file_source()).to_string())?;
        let credentials = Builder::from_file(file.path())?.build()?;
        assert_eq!(credentials.audience(), AUDIENCE);

        let err = Builder::from_file("/does/not/exist.json").err().unwrap();
        assert!(err.is_loading(), "{err:?}");

        std::fs::write(file.path(), "not json")?;
        let err = Builder::from_file(file.path()).err().unwrap();
        assert!(err.is_parsing(), "{err:?}");
        Ok(())
    }

    #[test]
    fn workforce_project_requires_workforce_pool() {
        let mut value = config(text_file_source());
        value["workforce_pool_user_project"] = json!(WORKFORCE_POOL_USER_PROJECT);
        let err = Builder::new(value).build().unwrap_err();
        assert!(err.is_workforce_project(), "{err:?}");
        assert!(
            err.to_string().contains(
                "workforce_pool_user_project should not be set for non-workforce pool credentials"
            ),
            "{err}"
        );
    }

    #[test]
    fn workforce_pool() -> TestResult {
        let mut value = config(text_file_source());
        value["audience"] = json!(WORKFORCE_AUDIENCE);
        value["workforce_pool_user_project"] = json!(WORKFORCE_POOL_USER_PROJECT);
        let credentials = Builder::new(value.clone()).build()?;
        assert!(credentials.is_workforce_pool());
        assert!(credentials.is_user());
        assert_eq!(
            credentials.workforce_pool_user_project(),
            Some(WORKFORCE_POOL_USER_PROJECT)
        );

        value["service_account_impersonation_url"] = json!(impersonation_url());
        let credentials = Builder::new(value).build()?;
        assert!(credentials.is_workforce_pool());
        assert!(!credentials.is_user());
        Ok(())
    }

    #[test]
    fn service_account_email() -> TestResult {
        let mut value = config(text_file_source());
        value["service_account_impersonation_url"] = json!(impersonation_url());
        let credentials = Builder::new(value.clone()).build()?;
        assert_eq!(credentials.service_account_email(), Some(SERVICE_ACCOUNT_EMAIL));

        value["service_account_impersonation_url"] = json!("https://iamcredentials.googleapis.com/v1/bad");
        let credentials = Builder::new(value).build()?;
        assert_eq!(credentials.service_account_email(), None);
        Ok(())
    }

    #[test]
    fn endpoint_validation() -> TestResult {
        let mut value = config(text_file_source());
        value["token_url"] = json!("https://sts.googleapis.com.evil.com/v1/token");
        let err = Builder::new(value.clone())
            .with_endpoint_validation(true)
            .build()
            .unwrap_err();
        assert!(err.is_invalid_url(), "{err:?}");
        // Validation is opt-in.
        Builder::new(value).build()?;

        let mut value = config(text_file_source());
        value["service_account_impersonation_url"] =
            json!("https://iamcredentials.googleapis.comevil.com/v1/x:generateAccessToken");
        let err = Builder::new(value)
            .with_endpoint_validation(true)
            .build()
            .unwrap_err();
        assert!(err.is_invalid_url(), "{err:?}");

        let mut value = config(text_file_source());
        value["service_account_impersonation_url"] = json!(impersonation_url());
        Builder::new(value).with_endpoint_validation(true).build()?;
        Ok(())
    }

    #[test]
    fn info_round_trip() -> TestResult {
        let value = json!({
            "type": "external_account",
            "audience": WORKFORCE_AUDIENCE,
            "subject_token_type": WORKFORCE_SUBJECT_TOKEN_TYPE,
            "token_url": TOKEN_URL,
            "token_info_url": TOKEN_INFO_URL,
            "service_account_impersonation_url": impersonation_url(),
            "service_account_impersonation": {"token_lifetime_seconds": 2800},
            "client_id": "username",
            "client_secret": "password",
            "credential_source": {"url": "http://fakeurl.com", "headers": {"a": "b"}},
            "quota_project_id": "QUOTA_PROJECT_ID",
            "workforce_pool_user_project": WORKFORCE_POOL_USER_PROJECT,
            "universe_domain": "googleapis.com",
        });
        let credentials = Builder::new(value.clone()).build()?;
        assert_eq!(credentials.info(), value);
        let copy = Builder::new(serde_json::from_str(&credentials.to_json())?).build()?;
        assert_eq!(copy.info(), value);
        Ok(())
    }

    #[test]
    fn info_minimal() -> TestResult {
        let credentials = Builder::new(json!({
            "audience": AUDIENCE,
            "subject_token_type": JWT_TOKEN_TYPE,
            "credential_source": {"certificate": {"use_default_certificate_config": "true"}},
        }))
        .build()?;
        assert_eq!(
            credentials.info(),
            json!({
                "type": "external_account",
                "audience": AUDIENCE,
                "subject_token_type": JWT_TOKEN_TYPE,
                "token_url": TOKEN_URL,
                "credential_source": {"certificate": {"use_default_certificate_config": "true"}},
                "universe_domain": "googleapis.com",
            })
        );
        Ok(())
    }

    #[test]
    fn with_quota_project() -> TestResult {
        let credentials = Builder::new(config(text_file_source())).build()?;
        let copy = credentials.with_quota_project("QUOTA_PROJECT_ID");
        assert_eq!(copy.quota_project_id(), Some("QUOTA_PROJECT_ID"));
        assert_eq!(credentials.quota_project_id(), None);
        assert_eq!(copy.info()["quota_project_id"], json!("QUOTA_PROJECT_ID"));
        Ok(())
    }

    #[test]
    fn scopes() -> TestResult {
        let credentials = Builder::new(config(text_file_source()))
            .with_default_scopes(["default"])
            .build()?;
        assert!(!credentials.requires_scopes());
        assert!(credentials.has_scopes(&["default"]));

        let scoped = credentials.with_scopes(vec!["scope1".into()], vec!["default".into()]);
        assert_eq!(scoped.scopes(), &["scope1".to_string()]);
        assert_eq!(scoped.default_scopes(), &["default".to_string()]);
        assert!(scoped.has_scopes(&["scope1"]));
        assert!(!scoped.has_scopes(&["default"]));

        let unscoped = Builder::new(config(text_file_source())).build()?;
        let scoped = crate::credentials::with_scopes_if_required(
            &unscoped,
            vec!["scope1".into()],
            vec![],
        );
        assert_eq!(scoped.scopes(), &["scope1".to_string()]);
        Ok(())
    }

    #[test]
    fn mtls_paths() -> TestResult {
        let credentials = Builder::new(config(json!({
            "certificate": {"use_default_certificate_config": true}
        })))
        .with_certificate_resolver(Arc::new(FixedResolver))
        .build()?;
        let paths = credentials.mtls_cert_and_key_paths()?;
        assert_eq!(paths.cert_path, format!("{DATA}/public_cert.pem"));
        assert_eq!(paths.key_path, format!("{DATA}/privatekey.pem"));

        let credentials = Builder::new(config(text_file_source())).build()?;
        let err = credentials.mtls_cert_and_key_paths().unwrap_err();
        assert!(err.to_string().contains(NOT_MTLS), "{err}");
        Ok(())
    }

    #[test]
    fn programmatic_missing_fields() {
        let provider = Arc::new(TestProvider {
            expected: SubjectTokenContext {
                subject_token_type: JWT_TOKEN_TYPE.into(),
                audience: AUDIENCE.into(),
            },
        });
        let err = ProgrammaticBuilder::new(provider.clone())
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .build()
            .unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
        assert!(err.to_string().contains("audience"), "{err}");

        let err = ProgrammaticBuilder::new(provider)
            .with_audience(AUDIENCE)
            .build()
            .unwrap_err();
        assert!(err.is_missing_field(), "{err:?}");
        assert!(err.to_string().contains("subject_token_type"), "{err}");
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_text_file_without_impersonation() -> TestResult {
        let credentials = Builder::new(config(text_file_source()))
            .with_scopes(["scope1", "scope2"])
            .with_default_scopes(["ignored"])
            .build()?;
        let executor = FakeExecutor::new(vec![sts_response()]);
        credentials.refresh(&executor).await?;

        assert_eq!(credentials.token().map(|t| t.token), Some("ACCESS_TOKEN".to_string()));
        assert_eq!(credentials.scopes(), &["scope1".to_string(), "scope2".to_string()]);
        assert!(credentials.valid());

        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, TOKEN_URL);
        assert_eq!(
            header(request, "content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(header(request, "authorization"), None);
        assert_eq!(
            header(request, "x-goog-api-client").map(str::to_string),
            Some(byoid_metrics_header_value(false, false, "file"))
        );
        assert_eq!(
            form(request),
            want_form(AUDIENCE, JWT_TOKEN_TYPE, "scope1 scope2", TEXT_FILE_SUBJECT_TOKEN)
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_default_scopes() -> TestResult {
        let mut value = config(text_file_source());
        value["client_id"] = json!("username");
        value["client_secret"] = json!("password");
        let credentials = Builder::new(value)
            .with_default_scopes(["scope1", "scope2"])
            .build()?;
        let executor = FakeExecutor::new(vec![sts_response()]);
        credentials.refresh(&executor).await?;

        let requests = executor.requests();
        assert_eq!(
            header(&requests[0], "authorization").map(str::to_string),
            Some(format!("Basic {BASIC_AUTH_ENCODING}"))
        );
        assert_eq!(
            form(&requests[0]),
            want_form(AUDIENCE, JWT_TOKEN_TYPE, "scope1 scope2", TEXT_FILE_SUBJECT_TOKEN)
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_with_impersonation() -> TestResult {
        let mut value = config(json_file_source());
        value["service_account_impersonation_url"] = json!(impersonation_url());
        let credentials = Builder::new(value)
            .with_scopes(["scope1", "scope2"])
            .build()?;
        let executor = FakeExecutor::new(vec![sts_response(), impersonation_response()?]);
        credentials.refresh(&executor).await?;

        assert_eq!(
            credentials.token().map(|t| t.token),
            Some("SA_ACCESS_TOKEN".to_string())
        );
        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            header(&requests[0], "x-goog-api-client").map(str::to_string),
            Some(byoid_metrics_header_value(true, false, "file"))
        );
        assert_eq!(
            form(&requests[0]),
            want_form(AUDIENCE, JWT_TOKEN_TYPE, IAM_SCOPE, JSON_FILE_SUBJECT_TOKEN)
        );

        let request = &requests[1];
        assert_eq!(request.url, impersonation_url());
        assert_eq!(header(request, "authorization"), Some("Bearer ACCESS_TOKEN"));
        assert_eq!(header(request, "content-type"), Some("application/json"));
        assert_eq!(
            header(request, "x-goog-api-client").map(str::to_string),
            Some(metrics_header_value(
                ACCESS_TOKEN_REQUEST_TYPE,
                IMPERSONATED_CREDENTIAL_TYPE
            ))
        );
        let body: Value = serde_json::from_slice(&request.body.clone().unwrap_or_default())?;
        assert_eq!(
            body,
            json!({"delegates": null, "scope": ["scope1", "scope2"], "lifetime": "3600s"})
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_impersonation_lifetime() -> TestResult {
        let mut value = config(text_file_source());
        value["service_account_impersonation_url"] = json!(impersonation_url());
        value["service_account_impersonation"] = json!({"token_lifetime_seconds": 2800});
        let credentials = Builder::new(value)
            .with_trust_boundary(TrustBoundary::no_op())
            .build()?;
        let executor = FakeExecutor::new(vec![sts_response(), impersonation_response()?]);
        credentials.refresh(&executor).await?;

        let requests = executor.requests();
        assert_eq!(
            header(&requests[0], "x-goog-api-client").map(str::to_string),
            Some(byoid_metrics_header_value(true, true, "file"))
        );
        assert_eq!(header(&requests[1], "x-allowed-locations"), Some("0x0"));
        let body: Value = serde_json::from_slice(&requests[1].body.clone().unwrap_or_default())?;
        assert_eq!(body["lifetime"], json!("2800s"));
        assert_eq!(body["scope"], json!([]));
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_impersonation_failure() -> TestResult {
        let mut value = config(text_file_source());
        value["service_account_impersonation_url"] = json!(impersonation_url());
        let credentials = Builder::new(value).build()?;
        let executor = FakeExecutor::new(vec![
            sts_response(),
            (403, json!({"error": {"message": "denied"}})),
        ]);
        let err = credentials.refresh(&executor).await.unwrap_err();
        assert!(err.to_string().contains("denied"), "{err}");
        // The federated token is not kept when impersonation fails.
        assert!(credentials.token().is_none());
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_workforce_without_client_auth() -> TestResult {
        let mut value = config(text_file_source());
        value["audience"] = json!(WORKFORCE_AUDIENCE);
        value["subject_token_type"] = json!(WORKFORCE_SUBJECT_TOKEN_TYPE);
        value["workforce_pool_user_project"] = json!(WORKFORCE_POOL_USER_PROJECT);
        let credentials = Builder::new(value).with_scopes(["scope1", "scope2"]).build()?;
        let executor = FakeExecutor::new(vec![sts_response()]);
        credentials.refresh(&executor).await?;

        let requests = executor.requests();
        let mut want = want_form(
            WORKFORCE_AUDIENCE,
            WORKFORCE_SUBJECT_TOKEN_TYPE,
            "scope1 scope2",
            TEXT_FILE_SUBJECT_TOKEN,
        );
        want.insert(
            "options".into(),
            "%7B%22userProject%22%3A%20%22WORKFORCE_POOL_USER_PROJECT_NUMBER%22%7D".into(),
        );
        assert_eq!(form(&requests[0]), want);
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_workforce_with_client_auth() -> TestResult {
        let mut value = config(text_file_source());
        value["audience"] = json!(WORKFORCE_AUDIENCE);
        value["subject_token_type"] = json!(WORKFORCE_SUBJECT_TOKEN_TYPE);
        value["workforce_pool_user_project"] = json!(WORKFORCE_POOL_USER_PROJECT);
        value["client_id"] = json!("username");
        value["client_secret"] = json!("password");
        let credentials = Builder::new(value).with_scopes(["scope1", "scope2"]).build()?;
        let executor = FakeExecutor::new(vec![sts_response()]);
        credentials.refresh(&executor).await?;

        let requests = executor.requests();
        assert_eq!(
            header(&requests[0], "authorization").map(str::to_string),
            Some(format!("Basic {BASIC_AUTH_ENCODING}"))
        );
        assert_eq!(
            form(&requests[0]),
            want_form(
                WORKFORCE_AUDIENCE,
                WORKFORCE_SUBJECT_TOKEN_TYPE,
                "scope1 scope2",
                TEXT_FILE_SUBJECT_TOKEN
            )
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_url_source() -> TestResult {
        let credentials = Builder::new(config(json!({
            "url": "http://fakeurl.com",
            "format": {"type": "json", "subject_token_field_name": "access_token"},
        })))
        .with_scopes(["scope1"])
        .build()?;
        let executor = FakeExecutor::new(vec![
            (200, json!({"access_token": "URL_SUBJECT_TOKEN"})),
            sts_response(),
        ]);
        credentials.refresh(&executor).await?;

        let requests = executor.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].url, "http://fakeurl.com");
        assert!(requests[0].body.is_none());
        assert_eq!(
            header(&requests[1], "x-goog-api-client").map(str::to_string),
            Some(byoid_metrics_header_value(false, false, "url"))
        );
        assert_eq!(
            form(&requests[1]).get("subject_token").map(String::as_str),
            Some("URL_SUBJECT_TOKEN")
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_certificate_source() -> TestResult {
        let mut value = config(json!({
            "certificate": {
                "use_default_certificate_config": true,
                "trust_chain_path": format!("{DATA}/trust_chain_with_leaf.pem"),
            }
        }));
        value["subject_token_type"] = json!(MTLS_TOKEN_TYPE);
        let credentials = Builder::new(value)
            .with_certificate_resolver(Arc::new(FixedResolver))
            .build()?;
        let executor = FakeExecutor::new(vec![sts_response()]);
        credentials.refresh(&executor).await?;

        let requests = executor.requests();
        assert_eq!(
            header(&requests[0], "x-goog-api-client").map(str::to_string),
            Some(byoid_metrics_header_value(false, false, "x509"))
        );
        let fields = form(&requests[0]);
        let chain: Vec<String> = serde_json::from_str(
            fields
                .get("subject_token")
                .map(String::as_str)
                .unwrap_or_default(),
        )?;
        assert_eq!(chain.len(), 2);
        assert_eq!(
            fields.get("subject_token_type").map(String::as_str),
            Some(MTLS_TOKEN_TYPE)
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_json_file_missing_field() -> TestResult {
        let path = format!("{DATA}/external_subject_token.json");
        let credentials = Builder::new(config(json!({
            "file": path,
            "format": {"type": "json", "subject_token_field_name": "not_found"},
        })))
        .build()?;
        let executor = FakeExecutor::new(vec![]);
        let err = credentials.refresh(&executor).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(&path), "{msg}");
        assert!(msg.contains("not_found"), "{msg}");
        assert!(executor.requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_expires_in_overflow() -> TestResult {
        let credentials = Builder::new(config(text_file_source())).build()?;
        for expires_in in [json!(u64::MAX), json!(u64::MAX.to_string())] {
            let executor = FakeExecutor::new(vec![(
                200,
                json!({"access_token": "ACCESS_TOKEN", "expires_in": expires_in}),
            )]);
            let err = credentials.refresh(&executor).await.unwrap_err();
            assert!(!err.is_transient(), "{err:?}");
            assert!(err.to_string().contains("invalid expires_in"), "{err}");
            assert!(credentials.token().is_none());
        }
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn non_blocking_expires_in_overflow() -> TestResult {
        let credentials = Builder::new(config(text_file_source()))
            .with_non_blocking_refresh()
            .build()?;
        let executor: SharedExecutor = Arc::new(FakeExecutor::new(vec![(
            200,
            json!({"access_token": "ACCESS_TOKEN", "expires_in": u64::MAX}),
        )]));
        let mut headers = HeaderMap::new();
        let err = credentials
            .before_request(&executor, &Method::GET, "https://example.com", &mut headers)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid expires_in"), "{err}");
        assert!(headers.is_empty());
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_sts_error() -> TestResult {
        let credentials = Builder::new(config(text_file_source())).build()?;
        let executor = FakeExecutor::new(vec![(
            400,
            json!({"error": "invalid_grant", "error_description": "Subject token is invalid."}),
        )]);
        let err = credentials.refresh(&executor).await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"), "{err}");
        assert!(credentials.token().is_none());
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn retrieve_subject_token() -> TestResult {
        let credentials = Builder::new(config(text_file_source())).build()?;
        let token = credentials
            .retrieve_subject_token(&FakeExecutor::new(vec![]))
            .await?;
        assert_eq!(token, TEXT_FILE_SUBJECT_TOKEN);
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn refresh_supplier() -> TestResult {
        let provider = Arc::new(TestProvider {
            expected: SubjectTokenContext {
                subject_token_type: JWT_TOKEN_TYPE.into(),
                audience: AUDIENCE.into(),
            },
        });
        let credentials = ProgrammaticBuilder::new(provider)
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .with_service_account_impersonation_url(impersonation_url())
            .with_scopes(["scope1", "scope2"])
            .build()?;
        assert!(credentials.info().get("credential_source").is_none());

        let executor = FakeExecutor::new(vec![sts_response(), impersonation_response()?]);
        credentials.refresh(&executor).await?;
        assert_eq!(
            credentials.token().map(|t| t.token),
            Some("SA_ACCESS_TOKEN".to_string())
        );
        let requests = executor.requests();
        assert_eq!(
            header(&requests[0], "x-goog-api-client").map(str::to_string),
            Some(byoid_metrics_header_value(true, false, "programmatic"))
        );
        assert_eq!(
            form(&requests[0]),
            want_form(AUDIENCE, JWT_TOKEN_TYPE, IAM_SCOPE, "supplied-token")
        );
        Ok(())
    }

    #[tokio::test]
    #[parallel]
    async fn supplier_error_propagates() -> TestResult {
        let provider = Arc::new(TestProvider {
            expected: SubjectTokenContext {
                subject_token_type: "other".into(),
                audience: AUDIENCE.into(),
            },
        });
        let credentials = ProgrammaticBuilder::new(provider)
            .with_audience(AUDIENCE)
            .with_subject_token_type(JWT_TOKEN_TYPE)
            .build()?;
        let err = credentials
            .refresh(&FakeExecutor::new(vec![]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected context"), "{err}");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    #[parallel]
    async fn before_request_sets_headers() -> TestResult {
        let credentials = Builder::new(config(text_file_source()))
            .with_quota_project_id("QUOTA_PROJECT_ID")
            .build()?;
        let executor = Arc::new(FakeExecutor::new(vec![sts_response()]));
        let shared: SharedExecutor = executor.clone();
        let mut headers = HeaderMap::new();
        credentials
            .before_request(&shared, &Method::GET, "https://storage.googleapis.com", &mut headers)
            .await?;
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer ACCESS_TOKEN")
        );
        assert_eq!(
            headers.get("x-goog-user-project").and_then(|v| v.to_str().ok()),
            Some("QUOTA_PROJECT_ID")
        );
        assert_eq!(
            credentials.expiry(),
            Some(Instant::now() + Duration::from_secs(3600))
        );
        assert_eq!(credentials.token_state(), TokenState::Fresh);

        // A second call reuses the token.
        credentials
            .before_request(&shared, &Method::GET, "https://storage.googleapis.com", &mut headers)
            .await?;
        assert_eq!(executor.requests().len(), 1);
        Ok(())
    }
}
