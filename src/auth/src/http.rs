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

//! The request executor used by credentials to reach token endpoints.
//!
//! Credentials never own an HTTP client. Every network call goes through a
//! [RequestExecutor] supplied by the caller, which also owns timeouts and
//! retry policies.

use crate::Result;
use crate::errors::{self, CredentialsError};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// An HTTP request issued by the credentials.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Creates a request without headers or a body.
    pub fn new<U: Into<String>>(method: Method, url: U) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// The status and raw payload of a response.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub data: Bytes,
}

impl HttpResponse {
    /// Returns `true` for statuses in the `200..=299` range.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parses the payload as JSON, the error mentions `what` was being parsed.
    pub(crate) fn json<T: DeserializeOwned>(&self, what: &str) -> Result<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| CredentialsError::new(false, format!("cannot parse {what}"), e))
    }
}

/// Executes HTTP requests on behalf of the credentials.
///
/// Implementations return `Ok` for any response received from the server,
/// including error statuses. Transport failures are reported as errors.
#[async_trait::async_trait]
pub trait RequestExecutor: std::fmt::Debug + Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// A shared [RequestExecutor], background refreshes keep a copy.
pub type SharedExecutor = Arc<dyn RequestExecutor>;

/// A [RequestExecutor] backed by a [reqwest::Client].
#[derive(Clone, Debug, Default)]
pub struct ReqwestExecutor {
    inner: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an existing client, for example one configured with timeouts.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }
}

#[async_trait::async_trait]
impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .inner
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| errors::from_http_error(e, "failed to send request"))?;
        let status = response.status();
        let data = response
            .bytes()
            .await
            .map_err(|e| errors::from_http_error(e, "failed to read response body"))?;
        Ok(HttpResponse { status, data })
    }
}
