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
use crate::errors;
use crate::http::{HttpRequest, RequestExecutor};
use http::{HeaderMap, Method};

const MSG: &str = "Unable to retrieve Identity Pool subject token";

#[derive(Clone, Debug)]
pub(crate) struct UrlSourcedCredentials {
    url: String,
    headers: HeaderMap,
    format: SubjectTokenFormat,
}

impl UrlSourcedCredentials {
    pub(crate) fn new(url: String, headers: HeaderMap, format: SubjectTokenFormat) -> Self {
        Self {
            url,
            headers,
            format,
        }
    }

    pub(crate) async fn subject_token(&self, executor: &dyn RequestExecutor) -> Result<String> {
        let request = HttpRequest::new(Method::GET, &self.url).with_headers(self.headers.clone());
        let response = executor.execute(request).await?;
        if !response.is_success() {
            return Err(errors::from_http_response(&response, MSG));
        }
        let body = String::from_utf8_lossy(&response.data);
        parse_subject_token(&body, &self.format, &self.url)
    }
}
