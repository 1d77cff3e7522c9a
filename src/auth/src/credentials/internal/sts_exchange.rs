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

//! OAuth 2.0 token exchange against the Security Token Service.
//!
//! Reference: https://datatracker.ietf.org/doc/html/rfc8693

use crate::Result;
use crate::constants::{ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};
use crate::credentials::internal::spaced_json;
use crate::errors;
use crate::headers_util::basic_auth_value;
use crate::http::{HttpRequest, RequestExecutor};
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::collections::BTreeMap;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Characters left unescaped in the `options` value.
const OPTIONS_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Handles OAuth2 Secure Token Service (STS) exchange.
pub(crate) struct STSHandler;

impl STSHandler {
    /// Performs an oauth2 token exchange with the provided [ExchangeTokenRequest] information.
    pub(crate) async fn exchange_token(
        executor: &dyn RequestExecutor,
        req: ExchangeTokenRequest,
    ) -> Result<TokenResponse> {
        let mut headers = req.headers;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        req.authentication.inject_auth(&mut headers)?;

        // The serializer is not `Send`, it must not live across an await.
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", TOKEN_EXCHANGE_GRANT_TYPE);
            form.append_pair("audience", &req.audience);
            if !req.scope.is_empty() {
                form.append_pair("scope", &req.scope.join(" "));
            }
            form.append_pair("requested_token_type", ACCESS_TOKEN_TYPE);
            form.append_pair("subject_token", &req.subject_token);
            form.append_pair("subject_token_type", &req.subject_token_type);
            if let Some(options) = req.extra_options.as_ref().filter(|o| !o.is_empty()) {
                form.append_pair("options", &encode_options(options)?);
            }
            form.finish()
        };

        let request = HttpRequest::new(Method::POST, req.url)
            .with_headers(headers)
            .with_body(body);
        let response = executor.execute(request).await?;
        if !response.is_success() {
            return Err(errors::from_http_response(
                &response,
                "failed to exchange subject token",
            ));
        }
        response.json("token exchange response")
    }
}

/// Formats `options` as a JSON object, then percent-encodes it.
///
/// The form encoder escapes the result once more.
fn encode_options(options: &BTreeMap<String, String>) -> Result<String> {
    let json = spaced_json::to_string(options)
        .map_err(|e| errors::CredentialsError::new(false, "cannot encode exchange options", e))?;
    Ok(utf8_percent_encode(&json, OPTIONS_ESCAPE).to_string())
}

/// TokenResponse is used to decode the remote server response during
/// an oauth2 token exchange.
#[derive(Deserialize, Default, PartialEq, Debug)]
pub(crate) struct TokenResponse {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) issued_token_type: Option<String>,
    #[serde(default)]
    pub(crate) token_type: Option<String>,
    #[serde(default, deserialize_with = "expires_in")]
    pub(crate) expires_in: Option<u64>,
    #[serde(default)]
    pub(crate) scope: Option<String>,
}

/// Some token services send `expires_in` as a string.
fn expires_in<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }
    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// ClientAuthentication represents an OAuth client ID and secret, sent in
/// the `Authorization: Basic` header.
/// See https://datatracker.ietf.org/doc/html/rfc6749#section-2.3.1.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ClientAuthentication {
    pub(crate) client_id: Option<String>,
    pub(crate) client_secret: Option<String>,
}

impl ClientAuthentication {
    /// Client authentication is in use when a client id is configured.
    pub(crate) fn is_configured(&self) -> bool {
        self.client_id.is_some()
    }

    pub(crate) fn inject_auth(&self, headers: &mut HeaderMap) -> Result<()> {
        if let Some(client_id) = &self.client_id {
            let secret = self.client_secret.as_deref().unwrap_or_default();
            headers.insert(AUTHORIZATION, basic_auth_value(client_id, secret)?);
        }
        Ok(())
    }
}

/// Information required to perform an oauth2 token exchange with the provided endpoint.
#[derive(Debug, Default)]
pub(crate) struct ExchangeTokenRequest {
    pub(crate) url: String,
    pub(crate) authentication: ClientAuthentication,
    pub(crate) headers: HeaderMap,
    pub(crate) subject_token: String,
    pub(crate) subject_token_type: String,
    pub(crate) audience: String,
    pub(crate) scope: Vec<String>,
    pub(crate) extra_options: Option<BTreeMap<String, String>>,
}
