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

//! Supply subject tokens from application code.
//!
//! Identity pool credentials usually read the subject token from a file, a
//! URL, or a certificate. Applications with other sources implement
//! [SubjectTokenProvider] and pass it to the [ProgrammaticBuilder].
//!
//! # Example
//! ```
//! # use google_cloud_auth_identity_pool::credentials::subject_token::{
//! #     Builder, SubjectToken, SubjectTokenContext, SubjectTokenProvider,
//! # };
//! # use google_cloud_auth_identity_pool::errors::CredentialsError;
//! # use google_cloud_auth_identity_pool::http::RequestExecutor;
//! #[derive(Debug)]
//! struct MyProvider;
//!
//! impl SubjectTokenProvider for MyProvider {
//!     type Error = CredentialsError;
//!     async fn subject_token(
//!         &self,
//!         _context: &SubjectTokenContext,
//!         _executor: &dyn RequestExecutor,
//!     ) -> Result<SubjectToken, Self::Error> {
//!         Ok(Builder::new("my-subject-token").build())
//!     }
//! }
//! ```
//!
//! [ProgrammaticBuilder]: crate::credentials::external_account::ProgrammaticBuilder

use crate::errors::SubjectTokenProviderError;
use crate::http::RequestExecutor;

/// Creates [SubjectToken] instances.
pub struct Builder {
    token: String,
}

impl Builder {
    pub fn new<T: Into<String>>(token: T) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn build(self) -> SubjectToken {
        SubjectToken { token: self.token }
    }
}

/// A token issued by an external identity provider.
pub struct SubjectToken {
    pub(crate) token: String,
}

impl std::fmt::Debug for SubjectToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubjectToken")
            .field("token", &"[censored]")
            .finish()
    }
}

/// What the credentials will do with the subject token.
///
/// Providers serving several audiences can use it to select the token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectTokenContext {
    pub subject_token_type: String,
    pub audience: String,
}

/// Fetches subject tokens for identity pool credentials.
///
/// Errors are returned to the caller of the refresh unchanged, wrapped in a
/// [CredentialsError].
///
/// [CredentialsError]: crate::errors::CredentialsError
pub trait SubjectTokenProvider: std::fmt::Debug + Send + Sync {
    /// The error type, [CredentialsError] is a good default.
    ///
    /// [CredentialsError]: crate::errors::CredentialsError
    type Error: SubjectTokenProviderError;

    /// Returns a subject token.
    ///
    /// `executor` is the request executor used for the current refresh,
    /// providers may use it to reach their identity provider.
    fn subject_token(
        &self,
        context: &SubjectTokenContext,
        executor: &dyn RequestExecutor,
    ) -> impl Future<Output = Result<SubjectToken, Self::Error>> + Send;
}

pub(crate) mod dynamic {
    use super::{SubjectToken, SubjectTokenContext};
    use crate::errors::{CredentialsError, SubjectTokenProviderError};
    use crate::http::RequestExecutor;

    /// A dyn-compatible, crate-private version of `SubjectTokenProvider`.
    #[async_trait::async_trait]
    pub trait SubjectTokenProvider: std::fmt::Debug + Send + Sync {
        async fn subject_token(
            &self,
            context: &SubjectTokenContext,
            executor: &dyn RequestExecutor,
        ) -> Result<SubjectToken, CredentialsError>;
    }

    /// The public SubjectTokenProvider implements the dyn-compatible one.
    #[async_trait::async_trait]
    impl<T> SubjectTokenProvider for T
    where
        T: super::SubjectTokenProvider,
    {
        async fn subject_token(
            &self,
            context: &SubjectTokenContext,
            executor: &dyn RequestExecutor,
        ) -> Result<SubjectToken, CredentialsError> {
            T::subject_token(self, context, executor)
                .await
                .map_err(|e| CredentialsError::from_source(e.is_transient(), e))
        }
    }
}
