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

//! Errors created during credentials construction.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for [Credentials] builders.
///
/// These errors are fatal. Retrying the same construction with the same
/// configuration fails in the same way.
///
/// [Credentials]: super::credentials::Credentials
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// A problem finding or opening the credentials file.
    pub fn is_loading(&self) -> bool {
        matches!(self.0, ErrorKind::Loading(_))
    }

    /// A problem parsing a credentials JSON specification.
    pub fn is_parsing(&self) -> bool {
        matches!(self.0, ErrorKind::Parsing(_))
    }

    /// The `credential_source` (or supplier) configuration is invalid.
    ///
    /// This covers ambiguous or missing sources, unsupported formats, and
    /// invalid certificate configurations.
    pub fn is_invalid_source(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidSource(_))
    }

    /// A required field was missing from the builder.
    pub fn is_missing_field(&self) -> bool {
        matches!(self.0, ErrorKind::MissingField(_))
    }

    /// A token or impersonation endpoint failed validation.
    pub fn is_invalid_url(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidUrl(_))
    }

    /// `workforce_pool_user_project` was set for a non-workforce audience.
    pub fn is_workforce_project(&self) -> bool {
        matches!(self.0, ErrorKind::WorkforceProject(_))
    }

    pub(crate) fn loading<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Loading(source.into()))
    }

    pub(crate) fn parsing<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Parsing(source.into()))
    }

    pub(crate) fn invalid_source<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::InvalidSource(source.into()))
    }

    pub(crate) fn missing_field(field: &'static str) -> Error {
        Error(ErrorKind::MissingField(field))
    }

    pub(crate) fn invalid_url<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::InvalidUrl(source.into()))
    }

    pub(crate) fn workforce_project<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::WorkforceProject(source.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("could not find or open the credentials file {0}")]
    Loading(#[source] BoxError),
    #[error("cannot parse the credentials file {0}")]
    Parsing(#[source] BoxError),
    #[error("invalid credential source {0}")]
    InvalidSource(#[source] BoxError),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid endpoint {0}")]
    InvalidUrl(#[source] BoxError),
    #[error("invalid workforce pool configuration {0}")]
    WorkforceProject(#[source] BoxError),
}
