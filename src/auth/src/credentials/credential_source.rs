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

//! Validates the `credential_source` configuration of identity pool
//! credentials, once, at construction time.
//!
//! The result is a [CredentialSource] which knows how to fetch the subject
//! token. Retrieval never looks at the raw configuration again.

use crate::BuildResult;
use crate::Result;
use crate::build_errors::Error as BuilderError;
use crate::credentials::certificate_config::{CertificateConfigLocation, CertificatePathResolver};
use crate::credentials::external_account_sources::certificate_sourced::CertificateSourcedCredentials;
use crate::credentials::external_account_sources::file_sourced::FileSourcedCredentials;
use crate::credentials::external_account_sources::programmatic_sourced::ProgrammaticSourcedCredentials;
use crate::credentials::external_account_sources::url_sourced::UrlSourcedCredentials;
use crate::credentials::subject_token::{SubjectTokenContext, dynamic};
use crate::errors::CredentialsError;
use crate::http::RequestExecutor;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::sync::Arc;

const FILE_KEY: &str = "file";
const URL_KEY: &str = "url";
const CERTIFICATE_KEY: &str = "certificate";
const ENVIRONMENT_ID_KEY: &str = "environment_id";
const TEXT_FORMAT_TYPE: &str = "text";
const JSON_FORMAT_TYPE: &str = "json";

/// How to extract the subject token from a file or a response body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SubjectTokenFormat {
    Text,
    Json { field_name: String },
}

/// A validated subject token source.
#[derive(Clone, Debug)]
pub(crate) enum CredentialSource {
    File(FileSourcedCredentials),
    Url(UrlSourcedCredentials),
    Certificate(CertificateSourcedCredentials),
    Programmatic(ProgrammaticSourcedCredentials),
}

impl CredentialSource {
    /// Validates `credential_source` (or `supplier`) into a source.
    pub(crate) fn from_config(
        credential_source: Option<&Value>,
        supplier: Option<Arc<dyn dynamic::SubjectTokenProvider>>,
        resolver: Arc<dyn CertificatePathResolver>,
    ) -> BuildResult<Self> {
        let credential_source = credential_source.filter(|v| !v.is_null());
        let source = match (credential_source, supplier) {
            (None, None) => {
                return Err(invalid(
                    "A valid credential source or a subject token supplier must be provided.",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "Identity pool credential cannot have both a credential source and a subject token supplier.",
                ));
            }
            (None, Some(supplier)) => {
                return Ok(Self::Programmatic(ProgrammaticSourcedCredentials::new(
                    supplier,
                )));
            }
            (Some(source), None) => source,
        };
        let Value::Object(source) = source else {
            return Err(invalid(
                "Invalid credential_source. The credential_source is not a dict.",
            ));
        };

        let present: Vec<&str> = [FILE_KEY, URL_KEY, CERTIFICATE_KEY]
            .into_iter()
            .filter(|k| source.get(*k).is_some_and(|v| !v.is_null()))
            .collect();
        match present.len() {
            0 => {
                return Err(invalid(
                    "Missing credential_source. A 'file', 'url', or 'certificate' must be provided.",
                ));
            }
            1 => {}
            _ => {
                return Err(invalid(
                    "Ambiguous credential_source. 'file', 'url', and 'certificate' are mutually exclusive.",
                ));
            }
        }
        if source.contains_key(ENVIRONMENT_ID_KEY) {
            return Err(invalid(
                "Invalid Identity Pool credential_source field 'environment_id'",
            ));
        }

        match present[0] {
            FILE_KEY => {
                let file = string_field(&source, FILE_KEY)?;
                let format = parse_format(&source)?;
                Ok(Self::File(FileSourcedCredentials::new(file, format)))
            }
            URL_KEY => {
                let url = string_field(&source, URL_KEY)?;
                let headers = parse_headers(&source)?;
                let format = parse_format(&source)?;
                Ok(Self::Url(UrlSourcedCredentials::new(url, headers, format)))
            }
            _ => {
                let (location, trust_chain_path) = parse_certificate(&source)?;
                Ok(Self::Certificate(CertificateSourcedCredentials::new(
                    location,
                    trust_chain_path,
                    resolver,
                )))
            }
        }
    }

    pub(crate) async fn subject_token(
        &self,
        context: &SubjectTokenContext,
        executor: &dyn RequestExecutor,
    ) -> Result<String> {
        match self {
            Self::File(s) => s.subject_token().await,
            Self::Url(s) => s.subject_token(executor).await,
            Self::Certificate(s) => s.subject_token().await,
            Self::Programmatic(s) => s.subject_token(context, executor).await,
        }
    }

    /// The `source/` value of the token exchange metrics header.
    pub(crate) fn metrics_source(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Url(_) => "url",
            Self::Certificate(_) => "x509",
            Self::Programmatic(_) => "programmatic",
        }
    }

    pub(crate) fn certificate(&self) -> Option<&CertificateSourcedCredentials> {
        match self {
            Self::Certificate(s) => Some(s),
            _ => None,
        }
    }
}

/// Extracts the subject token from `content`.
///
/// `origin` names the file or URL in error messages.
pub(crate) fn parse_subject_token(
    content: &str,
    format: &SubjectTokenFormat,
    origin: &str,
) -> Result<String> {
    let token = match format {
        SubjectTokenFormat::Text => content.to_string(),
        SubjectTokenFormat::Json { field_name } => {
            let parse_error = || {
                CredentialsError::from_msg(
                    false,
                    format!(
                        "Unable to parse subject_token from JSON file '{origin}' using key '{field_name}'"
                    ),
                )
            };
            let value: Value = serde_json::from_str(content).map_err(|_| parse_error())?;
            match value.get(field_name) {
                Some(Value::String(token)) => token.clone(),
                _ => return Err(parse_error()),
            }
        }
    };
    if token.is_empty() {
        return Err(CredentialsError::from_msg(
            false,
            "Missing subject_token in the credential_source file",
        ));
    }
    Ok(token)
}

fn invalid(msg: &str) -> BuilderError {
    BuilderError::invalid_source(msg.to_string())
}

fn string_field(source: &Map<String, Value>, key: &str) -> BuildResult<String> {
    match source.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(invalid(&format!(
            "Invalid credential_source field '{key}', expected a string"
        ))),
    }
}

fn parse_format(source: &Map<String, Value>) -> BuildResult<SubjectTokenFormat> {
    let Some(format) = source.get("format").filter(|v| !v.is_null()) else {
        return Ok(SubjectTokenFormat::Text);
    };
    let Value::Object(format) = format else {
        return Err(invalid("Invalid credential_source format, expected a dict"));
    };
    let format_type = match format.get("type") {
        None | Some(Value::Null) => TEXT_FORMAT_TYPE.to_string(),
        Some(Value::String(t)) => t.clone(),
        Some(other) => other.to_string(),
    };
    match format_type.to_lowercase().as_str() {
        TEXT_FORMAT_TYPE => Ok(SubjectTokenFormat::Text),
        JSON_FORMAT_TYPE => match format.get("subject_token_field_name") {
            Some(Value::String(field_name)) if !field_name.is_empty() => {
                Ok(SubjectTokenFormat::Json {
                    field_name: field_name.clone(),
                })
            }
            _ => Err(invalid(
                "Missing subject_token_field_name for JSON credential_source format",
            )),
        },
        _ => Err(invalid(&format!(
            "Invalid credential_source format '{format_type}'"
        ))),
    }
}

fn parse_headers(source: &Map<String, Value>) -> BuildResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let Some(values) = source.get("headers").filter(|v| !v.is_null()) else {
        return Ok(headers);
    };
    let Value::Object(values) = values else {
        return Err(invalid("Invalid credential_source headers, expected a dict"));
    };
    for (name, value) in values {
        let Value::String(value) = value else {
            return Err(invalid(&format!(
                "Invalid credential_source header '{name}', expected a string"
            )));
        };
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(BuilderError::invalid_source)?;
        let value = HeaderValue::from_str(value).map_err(BuilderError::invalid_source)?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn parse_certificate(
    source: &Map<String, Value>,
) -> BuildResult<(CertificateConfigLocation, Option<String>)> {
    let Some(Value::Object(certificate)) = source.get(CERTIFICATE_KEY) else {
        return Err(invalid(
            "Invalid credential_source certificate, expected a dict",
        ));
    };
    let use_default = match certificate.get("use_default_certificate_config") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
        Some(other) => {
            return Err(invalid(&format!(
                "Invalid certificate configuration, use_default_certificate_config must be a boolean, got {other}"
            )));
        }
    };
    let location = match certificate.get("certificate_config_location") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    let location = match (use_default, location) {
        (true, Some(_)) => {
            return Err(invalid(
                "Invalid certificate configuration, cannot specify both a certificate_config_location and use_default_certificate_config=true.",
            ));
        }
        (false, None) => {
            return Err(invalid(
                "Invalid certificate configuration, use_default_certificate_config should be true if no certificate_config_location is provided.",
            ));
        }
        (true, None) => CertificateConfigLocation::Default,
        (false, Some(path)) => CertificateConfigLocation::Path(path),
    };
    let trust_chain_path = match certificate.get("trust_chain_path") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    };
    Ok((location, trust_chain_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::certificate_config::DefaultCertificatePathResolver;
    use crate::credentials::subject_token::{Builder as SubjectTokenBuilder, SubjectToken};
    use serde_json::json;
    use test_case::test_case;

    #[derive(Debug)]
    struct TestSupplier;

    #[async_trait::async_trait]
    impl dynamic::SubjectTokenProvider for TestSupplier {
        async fn subject_token(
            &self,
            _context: &SubjectTokenContext,
            _executor: &dyn RequestExecutor,
        ) -> std::result::Result<SubjectToken, CredentialsError> {
            Ok(SubjectTokenBuilder::new("supplied").build())
        }
    }

    fn resolver() -> Arc<dyn CertificatePathResolver> {
        Arc::new(DefaultCertificatePathResolver)
    }

    fn from_value(value: Value) -> BuildResult<CredentialSource> {
        CredentialSource::from_config(Some(&value), None, resolver())
    }

    fn error_message(value: Value) -> String {
        let err = from_value(value).unwrap_err();
        assert!(err.is_invalid_source(), "{err:?}");
        err.to_string()
    }

    #[test]
    fn file_text() {
        let got = from_value(json!({"file": "/test-only/token.txt"})).unwrap();
        assert_eq!(got.metrics_source(), "file");
        let CredentialSource::File(file) = got else {
            panic!("expected a file source");
        };
        assert_eq!(
            file,
            FileSourcedCredentials::new("/test-only/token.txt".into(), SubjectTokenFormat::Text)
        );
    }

    #[test]
    fn file_json() {
        let got = from_value(json!({
            "file": "/test-only/token.json",
            "format": {"type": "json", "subject_token_field_name": "access_token"},
        }))
        .unwrap();
        let CredentialSource::File(file) = got else {
            panic!("expected a file source");
        };
        assert_eq!(
            file,
            FileSourcedCredentials::new(
                "/test-only/token.json".into(),
                SubjectTokenFormat::Json {
                    field_name: "access_token".into()
                }
            )
        );
    }

    #[test]
    fn url_with_headers() {
        let got = from_value(json!({
            "url": "https://test.example.com/token",
            "headers": {"Metadata": "True"},
            "format": {"type": "TEXT"},
        }))
        .unwrap();
        assert_eq!(got.metrics_source(), "url");
        assert!(matches!(got, CredentialSource::Url(_)), "{got:?}");
    }

    #[test_case(json!({"use_default_certificate_config": true}), CertificateConfigLocation::Default, None)]
    #[test_case(json!({"use_default_certificate_config": "true"}), CertificateConfigLocation::Default, None)]
    #[test_case(json!({"use_default_certificate_config": "True", "trust_chain_path": "chain.pem"}), CertificateConfigLocation::Default, Some("chain.pem"))]
    #[test_case(json!({"certificate_config_location": "path/to/config"}), CertificateConfigLocation::Path("path/to/config".into()), None)]
    #[test_case(json!({"use_default_certificate_config": false, "certificate_config_location": "path/to/config"}), CertificateConfigLocation::Path("path/to/config".into()), None)]
    fn certificate(config: Value, location: CertificateConfigLocation, chain: Option<&str>) {
        let got = from_value(json!({ "certificate": config })).unwrap();
        assert_eq!(got.metrics_source(), "x509");
        let certificate = got.certificate().expect("a certificate source");
        assert_eq!(certificate.location(), &location);
        assert_eq!(certificate.trust_chain_path(), chain);
    }

    #[test]
    fn supplier() {
        let got = CredentialSource::from_config(None, Some(Arc::new(TestSupplier)), resolver())
            .unwrap();
        assert_eq!(got.metrics_source(), "programmatic");
        assert!(got.certificate().is_none());

        let got = CredentialSource::from_config(
            Some(&Value::Null),
            Some(Arc::new(TestSupplier)),
            resolver(),
        )
        .unwrap();
        assert!(matches!(got, CredentialSource::Programmatic(_)), "{got:?}");
    }

    #[test]
    fn neither_source_nor_supplier() {
        let err = CredentialSource::from_config(None, None, resolver()).unwrap_err();
        assert!(err.is_invalid_source(), "{err:?}");
        assert!(
            err.to_string()
                .contains("A valid credential source or a subject token supplier must be provided."),
            "{err}"
        );
    }

    #[test]
    fn both_source_and_supplier() {
        let source = json!({"file": "/test-only/token.txt"});
        let err =
            CredentialSource::from_config(Some(&source), Some(Arc::new(TestSupplier)), resolver())
                .unwrap_err();
        assert!(
            err.to_string().contains(
                "Identity pool credential cannot have both a credential source and a subject token supplier."
            ),
            "{err}"
        );
    }

    #[test_case(json!("non-dict"), "The credential_source is not a dict.")]
    #[test_case(json!(["file"]), "The credential_source is not a dict.")]
    #[test_case(json!({"unsupported": "value"}), "Missing credential_source")]
    #[test_case(json!({"url": "https://test.example.com", "file": "token.txt"}), "Ambiguous credential_source")]
    #[test_case(json!({"url": "https://test.example.com", "certificate": {"use_default_certificate_config": true}}), "Ambiguous credential_source")]
    #[test_case(json!({"file": "token.txt", "certificate": {"use_default_certificate_config": true}}), "Ambiguous credential_source")]
    #[test_case(json!({"file": "token.txt", "url": "https://test.example.com", "certificate": {}}), "Ambiguous credential_source")]
    #[test_case(json!({"url": "https://test.example.com", "environment_id": "aws1"}), "Invalid Identity Pool credential_source field 'environment_id'")]
    #[test_case(json!({"file": "test.txt", "format": {"type": "xml"}}), "Invalid credential_source format 'xml'")]
    #[test_case(json!({"file": "test.txt", "format": {"type": "json"}}), "Missing subject_token_field_name for JSON credential_source format")]
    #[test_case(json!({"file": 42}), "Invalid credential_source field 'file'")]
    #[test_case(json!({"url": "https://test.example.com", "headers": {"bad header": "v"}}), "invalid credential source")]
    #[test_case(json!({"certificate": {"use_default_certificate_config": true, "certificate_config_location": "test"}}), "Invalid certificate configuration")]
    #[test_case(json!({"certificate": {"use_default_certificate_config": false}}), "Invalid certificate configuration")]
    #[test_case(json!({"certificate": {}}), "Invalid certificate configuration")]
    #[test_case(json!({"certificate": {"use_default_certificate_config": "maybe"}}), "Invalid certificate configuration")]
    fn rejected(source: Value, want: &str) {
        let got = error_message(source);
        assert!(got.contains(want), "{got}");
    }

    #[test]
    fn parse_text() {
        let got = parse_subject_token("abc", &SubjectTokenFormat::Text, "origin").unwrap();
        assert_eq!(got, "abc");
    }

    #[test]
    fn parse_json() {
        let format = SubjectTokenFormat::Json {
            field_name: "access_token".into(),
        };
        let got = parse_subject_token(r#"{"access_token": "abc"}"#, &format, "origin").unwrap();
        assert_eq!(got, "abc");
    }

    #[test_case("{")]
    #[test_case(r#"{"other": "abc"}"#)]
    #[test_case(r#"{"access_token": 42}"#)]
    #[test_case("")]
    fn parse_json_errors(content: &str) {
        let format = SubjectTokenFormat::Json {
            field_name: "access_token".into(),
        };
        let err = parse_subject_token(content, &format, "/test-only/origin.json").unwrap_err();
        assert!(!err.is_transient(), "{err:?}");
        assert!(
            err.to_string().contains(
                "Unable to parse subject_token from JSON file '/test-only/origin.json' using key 'access_token'"
            ),
            "{err}"
        );
    }

    #[test]
    fn parse_empty_token() {
        let err = parse_subject_token("", &SubjectTokenFormat::Text, "origin").unwrap_err();
        assert!(
            err.to_string()
                .contains("Missing subject_token in the credential_source file"),
            "{err}"
        );
        let format = SubjectTokenFormat::Json {
            field_name: "access_token".into(),
        };
        let err = parse_subject_token(r#"{"access_token": ""}"#, &format, "origin").unwrap_err();
        assert!(
            err.to_string()
                .contains("Missing subject_token in the credential_source file"),
            "{err}"
        );
    }
}
