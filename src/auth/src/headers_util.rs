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

use crate::Result;
use crate::errors::CredentialsError;
use crate::trust_boundary::{TRUST_BOUNDARY_HEADER, TrustBoundary};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

mod build_info {
    // The file has been placed there by the build script.
    include!(concat!(env!("OUT_DIR"), "/build_env.rs"));
}

/// The name of the telemetry header.
pub(crate) const X_GOOG_API_CLIENT: &str = "x-goog-api-client";

/// The header used to bill requests to a quota project.
pub(crate) const QUOTA_PROJECT_KEY: &str = "x-goog-user-project";

/// Access token request type.
pub(crate) const ACCESS_TOKEN_REQUEST_TYPE: &str = "at";

/// Impersonated credentials type.
pub(crate) const IMPERSONATED_CREDENTIAL_TYPE: &str = "imp";

/// Format the struct as needed for the `x-goog-api-client` header.
pub(crate) fn metrics_header_value(request_type: &str, cred_type: &str) -> String {
    let rustc_version = build_info::RUSTC_VERSION;
    let auth_version = build_info::PKG_VERSION;

    format!(
        "gl-rust/{rustc_version} auth/{auth_version} auth-request-type/{request_type} cred-type/{cred_type}"
    )
}

/// The `x-goog-api-client` value for token exchange requests.
///
/// `source` is one of `file`, `url`, `x509`, or `programmatic`.
pub(crate) fn byoid_metrics_header_value(
    impersonation: bool,
    config_lifetime: bool,
    source: &str,
) -> String {
    let rustc_version = build_info::RUSTC_VERSION;
    let auth_version = build_info::PKG_VERSION;

    format!(
        "gl-rust/{rustc_version} auth/{auth_version} google-byoid-sdk sa-impersonation/{impersonation} config-lifetime/{config_lifetime} source/{source}"
    )
}

/// Sets `authorization` and, when present, the quota project and trust
/// boundary headers.
///
/// A no-op trust boundary is not sent.
pub(crate) fn build_bearer_headers(
    token: &str,
    quota_project_id: Option<&str>,
    trust_boundary: Option<&TrustBoundary>,
    headers: &mut HeaderMap,
) -> Result<()> {
    let mut value = header_value(&format!("Bearer {token}"))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);

    if let Some(project) = quota_project_id {
        headers.insert(
            HeaderName::from_static(QUOTA_PROJECT_KEY),
            header_value(project)?,
        );
    }

    if let Some(locations) = trust_boundary.and_then(TrustBoundary::header_value) {
        headers.insert(
            HeaderName::from_static(TRUST_BOUNDARY_HEADER),
            header_value(locations)?,
        );
    }
    Ok(())
}

/// The `Authorization: Basic` value for an OAuth client.
pub(crate) fn basic_auth_value(client_id: &str, client_secret: &str) -> Result<HeaderValue> {
    let encoded = STANDARD.encode(format!("{client_id}:{client_secret}"));
    let mut value = header_value(&format!("Basic {encoded}"))?;
    value.set_sensitive(true);
    Ok(value)
}

pub(crate) fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| CredentialsError::new(false, "invalid header value", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_header() {
        let got = metrics_header_value(ACCESS_TOKEN_REQUEST_TYPE, IMPERSONATED_CREDENTIAL_TYPE);
        assert!(got.starts_with("gl-rust/"), "{got}");
        assert!(got.contains(&format!("auth/{}", env!("CARGO_PKG_VERSION"))), "{got}");
        assert!(got.ends_with(" auth-request-type/at cred-type/imp"), "{got}");
    }

    #[test]
    fn byoid_metrics_header() {
        let got = byoid_metrics_header_value(true, false, "file");
        assert!(got.starts_with("gl-rust/"), "{got}");
        assert!(
            got.ends_with(" google-byoid-sdk sa-impersonation/true config-lifetime/false source/file"),
            "{got}"
        );

        let got = byoid_metrics_header_value(false, true, "x509");
        assert!(
            got.ends_with(" google-byoid-sdk sa-impersonation/false config-lifetime/true source/x509"),
            "{got}"
        );
    }

    #[test]
    fn bearer_only() {
        let mut headers = HeaderMap::new();
        build_bearer_headers("test_token", None, None, &mut headers).unwrap();
        assert_eq!(headers.len(), 1, "{headers:?}");
        let value = headers.get(AUTHORIZATION).unwrap();
        assert_eq!(value, HeaderValue::from_static("Bearer test_token"));
        assert!(value.is_sensitive());
    }

    #[test]
    fn bearer_with_quota_project() {
        let mut headers = HeaderMap::new();
        build_bearer_headers("test_token", Some("test-project-123"), None, &mut headers)
            .unwrap();
        assert_eq!(headers.len(), 2, "{headers:?}");
        assert_eq!(
            headers.get(QUOTA_PROJECT_KEY).unwrap(),
            HeaderValue::from_static("test-project-123")
        );
    }

    #[test]
    fn bearer_with_trust_boundary() {
        let boundary = TrustBoundary::new(vec!["us-central1".into()], "0xA30");
        let mut headers = HeaderMap::new();
        build_bearer_headers("test_token", None, Some(&boundary), &mut headers).unwrap();
        assert_eq!(headers.len(), 2, "{headers:?}");
        assert_eq!(
            headers.get(TRUST_BOUNDARY_HEADER).unwrap(),
            HeaderValue::from_static("0xA30")
        );
    }

    #[test]
    fn bearer_with_no_op_trust_boundary() {
        let boundary = TrustBoundary::no_op();
        let mut headers = HeaderMap::new();
        build_bearer_headers("test_token", None, Some(&boundary), &mut headers).unwrap();
        assert!(headers.get(TRUST_BOUNDARY_HEADER).is_none(), "{headers:?}");
    }

    #[test]
    fn bearer_replaces_existing() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer old"));
        headers.insert("x-other", HeaderValue::from_static("kept"));
        build_bearer_headers("new", None, None, &mut headers).unwrap();
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap(),
            HeaderValue::from_static("Bearer new")
        );
        assert_eq!(headers.get("x-other").unwrap(), "kept");
    }

    #[test]
    fn bearer_invalid_token() {
        let mut headers = HeaderMap::new();
        let err = build_bearer_headers("bad\ntoken", None, None, &mut headers).unwrap_err();
        assert!(!err.is_transient(), "{err:?}");
    }

    #[test]
    fn basic_auth() {
        let value = basic_auth_value("CLIENT_ID", "SECRET").unwrap();
        // base64("CLIENT_ID:SECRET")
        assert_eq!(value, HeaderValue::from_static("Basic Q0xJRU5UX0lEOlNFQ1JFVA=="));
        assert!(value.is_sensitive());
    }
}
