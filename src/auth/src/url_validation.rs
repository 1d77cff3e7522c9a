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

//! Allow-lists the endpoints that receive credential-bearing requests.
//!
//! Token exchange and impersonation requests carry subject tokens and access
//! tokens. A configuration pointing them at an arbitrary host would leak
//! those tokens, so both endpoints must be Google service endpoints:
//!
//! - `{service}.googleapis.com`
//! - `{region}.{service}.googleapis.com`
//! - `{service}.{region}.googleapis.com`
//! - `{region}-{service}.googleapis.com`
//! - `{service}-{suffix}.p.googleapis.com` (Private Service Connect)
//!
//! where region and suffix are lowercase letters, digits, and single hyphens.
//! Hosts are lowercased while parsing, so `US-EAST-1` is accepted.

use regex::Regex;
use std::sync::LazyLock;

const SEGMENT: &str = "[a-z0-9]+(?:-[a-z0-9]+)*";

fn host_pattern(service: &str) -> Regex {
    let pattern = format!(
        r"^(?:{SEGMENT}\.{service}|{service}|{service}\.{SEGMENT}|{SEGMENT}-{service})(?:\.mtls)?\.googleapis\.com$|^{service}-{SEGMENT}\.p(?:\.mtls)?\.googleapis\.com$"
    );
    // The pattern is built from constants, it is always valid.
    Regex::new(&pattern).unwrap_or_else(|e| panic!("invalid endpoint pattern {pattern}: {e}"))
}

static STS_HOST: LazyLock<Regex> = LazyLock::new(|| host_pattern("sts"));
static IAM_CREDENTIALS_HOST: LazyLock<Regex> = LazyLock::new(|| host_pattern("iamcredentials"));

/// Returns `true` if `url` is an acceptable Security Token Service endpoint.
pub fn is_valid_token_url(url: &str) -> bool {
    is_valid_url(url, &STS_HOST)
}

/// Returns `true` if `url` is an acceptable IAM credentials endpoint, used
/// for service account impersonation.
pub fn is_valid_impersonation_url(url: &str) -> bool {
    is_valid_url(url, &IAM_CREDENTIALS_HOST)
}

fn is_valid_url(url: &str, host: &Regex) -> bool {
    // `url::Url` silently strips tabs and newlines, and repairs `https:/host`.
    // Both are rejected before parsing.
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return false;
    }
    let has_prefix = url
        .get(..8)
        .is_some_and(|p| p.eq_ignore_ascii_case("https://"));
    if !has_prefix {
        return false;
    }
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    if parsed.scheme() != "https" {
        return false;
    }
    parsed.host_str().is_some_and(|h| host.is_match(h))
}
