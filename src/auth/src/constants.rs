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

use std::time::Duration;

/// The universe domain used when none is configured.
pub(crate) const DEFAULT_UNIVERSE_DOMAIN: &str = "googleapis.com";
/// The `type` field of external account configuration files.
pub(crate) const EXTERNAL_ACCOUNT_TYPE: &str = "external_account";
/// Token Exchange OAuth Grant Type
pub(crate) const TOKEN_EXCHANGE_GRANT_TYPE: &str =
    "urn:ietf:params:oauth:grant-type:token-exchange";
/// Access Token Oauth Token Type
pub(crate) const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
/// JWT OAuth Token Type
pub(crate) const JWT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
/// mTLS OAuth Token Type, used by certificate sourced credentials.
pub(crate) const MTLS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:mtls";
/// The scope requested from STS when the token is used for impersonation.
pub(crate) const IAM_SCOPE: &str = "https://www.googleapis.com/auth/iam";
/// The lifetime requested for impersonated tokens when none is configured.
pub(crate) const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
