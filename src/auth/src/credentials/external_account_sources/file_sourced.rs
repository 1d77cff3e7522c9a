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
use crate::credentials::credential_source::{SubjectTokenFormat, parse_subject_token};
use crate::errors::CredentialsError;
use std::io::ErrorKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileSourcedCredentials {
    file: String,
    format: SubjectTokenFormat,
}

impl FileSourcedCredentials {
    pub(crate) fn new(file: String, format: SubjectTokenFormat) -> Self {
        Self { file, format }
    }

    pub(crate) async fn subject_token(&self) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.file)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CredentialsError::from_msg(
                    false,
                    format!("File '{}' was not found", self.file),
                ),
                _ => CredentialsError::new(
                    false,
                    format!("cannot read subject token file '{}'", self.file),
                    e,
                ),
            })?;
        parse_subject_token(content.trim(), &self.format, &self.file)
    }
}
