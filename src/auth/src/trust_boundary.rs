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

//! Trust boundaries restrict the locations where a token may be used.
//!
//! When enabled via `GOOGLE_AUTH_ENABLE_TRUST_BOUNDARIES`, credentials look up
//! the allowed locations after each refresh and attach the encoded value to
//! outgoing requests.

use crate::Result;
use crate::errors::{self, CredentialsError};
use crate::headers_util::build_bearer_headers;
use crate::http::{HttpRequest, RequestExecutor};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};

pub(crate) const TRUST_BOUNDARY_HEADER: &str = "x-allowed-locations";
pub(crate) const NO_OP_ENCODED_LOCATIONS: &str = "0x0";
pub(crate) const TRUST_BOUNDARIES_ENV_VAR: &str = "GOOGLE_AUTH_ENABLE_TRUST_BOUNDARIES";

/// The set of locations where a token may be used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustBoundary {
    #[serde(default)]
    locations: Vec<String>,
    #[serde(rename = "encodedLocations")]
    encoded_locations: String,
}

impl TrustBoundary {
    pub fn new<T: Into<String>>(locations: Vec<String>, encoded_locations: T) -> Self {
        Self {
            locations,
            encoded_locations: encoded_locations.into(),
        }
    }

    /// A boundary that allows all locations.
    ///
    /// It is never sent to services.
    pub fn no_op() -> Self {
        Self::new(Vec::new(), NO_OP_ENCODED_LOCATIONS)
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }

    pub fn encoded_locations(&self) -> &str {
        &self.encoded_locations
    }

    pub fn is_no_op(&self) -> bool {
        self.encoded_locations == NO_OP_ENCODED_LOCATIONS
    }

    /// The value for the `x-allowed-locations` header, `None` for no-op
    /// boundaries.
    pub(crate) fn header_value(&self) -> Option<&str> {
        if self.is_no_op() {
            return None;
        }
        Some(&self.encoded_locations)
    }
}

pub(crate) fn lookup_enabled() -> bool {
    std::env::var(TRUST_BOUNDARIES_ENV_VAR)
        .map(|v| v.to_lowercase())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

pub(crate) fn service_account_lookup_url(email: &str, universe_domain: &str) -> String {
    format!(
        "https://iamcredentials.{universe_domain}/v1/projects/-/serviceAccounts/{email}/allowedLocations"
    )
}

pub(crate) fn external_account_lookup_url(audience: &str, universe_domain: &str) -> Option<String> {
    let path = audience
        .trim_start_matches("//iam.googleapis.com/")
        .trim_start_matches("https://iam.googleapis.com/")
        .trim_start_matches('/');

    let parts: Vec<&str> = path.split('/').collect();

    // Workload: projects/{project}/locations/global/workloadIdentityPools/{pool}/providers/{provider}
    if parts.len() >= 6
        && parts[0] == "projects"
        && parts[2] == "locations"
        && parts[4] == "workloadIdentityPools"
    {
        let project = parts[1];
        let pool = parts[5];
        return Some(format!(
            "https://iamcredentials.{universe_domain}/v1/projects/{project}/locations/global/workloadIdentityPools/{pool}/allowedLocations"
        ));
    }

    // Workforce: locations/global/workforcePools/{pool}/providers/{provider}
    if parts.len() >= 4 && parts[0] == "locations" && parts[2] == "workforcePools" {
        let pool = parts[3];
        return Some(format!(
            "https://iamcredentials.{universe_domain}/v1/locations/global/workforcePools/{pool}/allowedLocations"
        ));
    }

    None
}

/// Fetches the allowed locations for the principal behind `token`.
pub(crate) async fn fetch_trust_boundary(
    executor: &dyn RequestExecutor,
    url: &str,
    token: &str,
) -> Result<TrustBoundary> {
    let mut headers = HeaderMap::new();
    build_bearer_headers(token, None, None, &mut headers)?;
    let request = HttpRequest::new(Method::GET, url).with_headers(headers);
    let response = executor.execute(request).await?;
    if !response.is_success() {
        return Err(errors::from_http_response(
            &response,
            "failed to fetch trust boundary",
        ));
    }
    let boundary: TrustBoundary = response.json("trust boundary response")?;
    if boundary.encoded_locations.is_empty() {
        return Err(CredentialsError::from_msg(
            false,
            "trust boundary response is missing encodedLocations",
        ));
    }
    Ok(boundary)
}
