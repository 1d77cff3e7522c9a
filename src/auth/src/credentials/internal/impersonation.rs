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

//! Exchanges a federated access token for a service account access token.

use crate::Result;
use crate::errors::{self, CredentialsError};
use crate::headers_util::{
    self, ACCESS_TOKEN_REQUEST_TYPE, IMPERSONATED_CREDENTIAL_TYPE, header_value,
    metrics_header_value,
};
use crate::http::{HttpRequest, RequestExecutor};
use crate::token::Token;
use crate::trust_boundary::{TRUST_BOUNDARY_HEADER, TrustBoundary};
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

const MSG: &str = "failed to fetch token";

#[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
struct GenerateAccessTokenRequest {
    delegates: Option<Vec<String>>,
    scope: Vec<String>,
    lifetime: String,
}

#[derive(serde::Deserialize)]
struct GenerateAccessTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "expireTime")]
    expire_time: String,
}

/// Calls `generateAccessToken` on `service_account_impersonation_url` using
/// `access_token` as the caller identity.
pub(crate) async fn generate_access_token(
    executor: &dyn RequestExecutor,
    access_token: &str,
    scopes: Vec<String>,
    lifetime: Duration,
    service_account_impersonation_url: &str,
    trust_boundary: Option<&TrustBoundary>,
) -> Result<Token> {
    let body = GenerateAccessTokenRequest {
        delegates: None,
        scope: scopes,
        lifetime: format!("{}s", lifetime.as_secs()),
    };
    let body = serde_json::to_vec(&body)
        .map_err(|e| CredentialsError::new(false, "cannot encode impersonation request", e))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut bearer = header_value(&format!("Bearer {access_token}"))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(
        HeaderName::from_static(headers_util::X_GOOG_API_CLIENT),
        header_value(&metrics_header_value(
            ACCESS_TOKEN_REQUEST_TYPE,
            IMPERSONATED_CREDENTIAL_TYPE,
        ))?,
    );
    if let Some(boundary) = trust_boundary {
        headers.insert(
            HeaderName::from_static(TRUST_BOUNDARY_HEADER),
            header_value(boundary.encoded_locations())?,
        );
    }

    let request = HttpRequest::new(Method::POST, service_account_impersonation_url)
        .with_headers(headers)
        .with_body(body);
    let response = executor.execute(request).await?;
    if !response.is_success() {
        return Err(errors::from_http_response(&response, MSG));
    }

    let token_response: GenerateAccessTokenResponse =
        response.json("impersonation response")?;
    let parsed_dt = OffsetDateTime::parse(
        &token_response.expire_time,
        &time::format_description::well_known::Rfc3339,
    )
    .map_err(|e| CredentialsError::new(false, "cannot parse impersonation expireTime", e))?;

    // An expiration in the past yields an already expired token.
    let remaining = Duration::try_from(parsed_dt - OffsetDateTime::now_utc()).unwrap_or_default();
    let expires_at = Instant::now().checked_add(remaining).ok_or_else(|| {
        CredentialsError::from_msg(
            false,
            format!("invalid impersonation expireTime {}", token_response.expire_time),
        )
    })?;
    Ok(Token {
        token: token_response.access_token,
        token_type: "Bearer".to_string(),
        expires_at: Some(expires_at),
        metadata: None,
    })
}
