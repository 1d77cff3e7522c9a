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

//! Errors raised while refreshing or using credentials.

use crate::http::HttpResponse;
use http::StatusCode;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

type ArcError = Arc<dyn Error + Send + Sync + 'static>;

/// Represents an error refreshing or using [Credentials].
///
/// Returned when the subject token cannot be retrieved, when the token
/// exchange or impersonation calls fail, or when a background refresh failed
/// and the credentials have no usable token left.
///
/// The type is cheap to clone, the background refresh worker keeps a copy of
/// the last error it observed.
///
/// [Credentials]: crate::credentials::Credentials
#[derive(Clone, Debug)]
pub struct CredentialsError {
    /// A boolean value indicating whether the error may succeed on a future
    /// attempt.
    ///
    /// This core does not retry. Applications and client libraries should use
    /// [Exponential backoff] and [retry budgets] in their retry loops.
    ///
    /// [Exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
    /// [retry budgets]: https://docs.rs/tower/latest/tower/retry/budget/index.html
    is_transient: bool,
    message: Option<String>,
    source: Option<ArcError>,
}

impl CredentialsError {
    /// Creates a new `CredentialsError` with a message and a source.
    pub fn new<M, T>(is_transient: bool, message: M, source: T) -> Self
    where
        M: Into<String>,
        T: Error + Send + Sync + 'static,
    {
        CredentialsError {
            is_transient,
            message: Some(message.into()),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `CredentialsError` from a message.
    pub fn from_msg<T: Into<String>>(is_transient: bool, message: T) -> Self {
        CredentialsError {
            is_transient,
            message: Some(message.into()),
            source: None,
        }
    }

    /// Creates a new `CredentialsError` wrapping `source`.
    ///
    /// The message of `source` is reported unchanged.
    pub fn from_source<T: Error + Send + Sync + 'static>(is_transient: bool, source: T) -> Self {
        CredentialsError {
            is_transient,
            message: None,
            source: Some(Arc::new(source)),
        }
    }

    /// Returns `true` if a future attempt may succeed.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }
}

impl Error for CredentialsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|arc| arc.as_ref() as &(dyn Error + 'static))
    }
}

const TRANSIENT_MSG: &str = "but future attempts may succeed";
const PERMANENT_MSG: &str = "and future attempts will not succeed";

impl Display for CredentialsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let msg = if self.is_transient {
            TRANSIENT_MSG
        } else {
            PERMANENT_MSG
        };
        match (&self.message, &self.source) {
            (Some(m), Some(s)) => write!(f, "cannot refresh credentials, {msg}, {m}: {s}"),
            (Some(m), None) => write!(f, "cannot refresh credentials, {msg}, {m}"),
            (None, Some(s)) => write!(f, "cannot refresh credentials, {msg}, {s}"),
            (None, None) => write!(f, "cannot refresh credentials, {msg}"),
        }
    }
}

/// The error type returned by [SubjectTokenProvider] implementations.
///
/// Credentials wrap these errors without rewriting their message. The
/// `is_transient()` value decides whether the resulting [CredentialsError]
/// is transient.
///
/// [SubjectTokenProvider]: crate::credentials::subject_token::SubjectTokenProvider
pub trait SubjectTokenProviderError: Error + Send + Sync + 'static {
    /// Returns `true` if a future attempt to fetch the subject token may
    /// succeed.
    fn is_transient(&self) -> bool;
}

impl SubjectTokenProviderError for CredentialsError {
    fn is_transient(&self) -> bool {
        self.is_transient
    }
}

pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

/// Maps a non-2xx response into a [CredentialsError].
///
/// The response body is included in the message, token endpoints use it to
/// report the reason for a failure.
pub(crate) fn from_http_response(response: &HttpResponse, msg: &str) -> CredentialsError {
    let body = String::from_utf8_lossy(&response.data);
    CredentialsError::from_msg(
        is_retryable(response.status),
        format!("{msg}, status={}, body=<{body}>", response.status),
    )
}

/// Maps a transport error into a [CredentialsError].
pub(crate) fn from_http_error(err: reqwest::Error, msg: &str) -> CredentialsError {
    let transient = err.is_timeout() || err.is_connect();
    CredentialsError::new(transient, msg, err)
}
