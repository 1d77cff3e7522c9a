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

//! Google Cloud Client Libraries for Rust - Identity Pool Credentials
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. We welcome feedback about the
//! APIs, documentation, missing features, bugs, etc.
//!
//! This crate implements [workload] and [workforce] identity federation:
//! applications running outside Google Cloud present a credential issued by
//! their own identity provider and exchange it for a Google Cloud access
//! token.
//!
//! The entry points are the builders in [credentials::external_account]. The
//! resulting credentials cache the access token, refresh it before it
//! expires, and add the `authorization` header (and the optional quota
//! project and trust boundary headers) to outgoing requests. All HTTP traffic
//! goes through a [http::RequestExecutor] supplied by the caller.
//!
//! [workload]: https://cloud.google.com/iam/docs/workload-identity-federation
//! [workforce]: https://cloud.google.com/iam/docs/workforce-identity-federation

pub mod build_errors;
pub mod errors;

/// Types and functions to work with Google Cloud authentication [Credentials].
///
/// [Credentials]: https://cloud.google.com/docs/authentication#credentials
pub mod credentials;

/// Types and functions to work with auth [Tokens].
///
/// [Tokens]: https://cloud.google.com/docs/authentication#token
pub mod token;

pub mod token_state;

/// The HTTP seam used by all token requests.
pub mod http;

/// Regional access restrictions attached to credentials.
pub mod trust_boundary;

pub mod url_validation;

pub(crate) mod constants;

/// Headers utility functions to work with Google Cloud authentication [Credentials].
///
/// [Credentials]: https://cloud.google.com/docs/authentication#credentials
pub(crate) mod headers_util;

pub(crate) mod refresh_worker;

/// A `Result` alias where the `Err` case is
/// `google_cloud_auth_identity_pool::errors::CredentialsError`.
pub(crate) type Result<T> = std::result::Result<T, crate::errors::CredentialsError>;

/// A `Result` alias where the `Err` case is [build_errors::Error].
pub type BuildResult<T> = std::result::Result<T, build_errors::Error>;
