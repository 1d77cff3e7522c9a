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

//! Locate the client certificate and key for x509 credential sources.
//!
//! The certificate configuration file is written by `gcloud` and contains,
//! among other things:
//!
//! ```json
//! {
//!   "cert_configs": {
//!     "workload": {
//!       "cert_path": "path/to/cert.pem",
//!       "key_path": "path/to/key.pem"
//!     }
//!   }
//! }
//! ```

use crate::Result;
use crate::errors::CredentialsError;
use serde::Deserialize;
use std::path::PathBuf;

const CERTIFICATE_CONFIG_VAR: &str = "GOOGLE_API_CERTIFICATE_CONFIG";
const CERTIFICATE_CONFIG_FILE: &str = "certificate_config.json";

/// Where to find the certificate configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateConfigLocation {
    /// Use `GOOGLE_API_CERTIFICATE_CONFIG`, or the well-known `gcloud`
    /// location if that is not set.
    Default,
    /// An explicit path to the configuration file.
    Path(String),
}

/// The workload certificate and private key files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificatePaths {
    pub cert_path: String,
    pub key_path: String,
}

/// Resolves a [CertificateConfigLocation] into certificate and key paths.
///
/// Applications rarely need to implement this trait, it is mostly useful in
/// tests and in environments where the configuration lives elsewhere.
pub trait CertificatePathResolver: std::fmt::Debug + Send + Sync {
    fn resolve(&self, location: &CertificateConfigLocation) -> Result<CertificatePaths>;
}

/// Reads the `gcloud` certificate configuration file.
#[derive(Clone, Debug, Default)]
pub struct DefaultCertificatePathResolver;

#[derive(Deserialize)]
struct CertificateConfigFile {
    cert_configs: CertConfigs,
}

#[derive(Deserialize)]
struct CertConfigs {
    workload: Option<WorkloadConfig>,
}

#[derive(Deserialize)]
struct WorkloadConfig {
    cert_path: String,
    key_path: String,
}

impl CertificatePathResolver for DefaultCertificatePathResolver {
    fn resolve(&self, location: &CertificateConfigLocation) -> Result<CertificatePaths> {
        let path = match location {
            CertificateConfigLocation::Path(p) => PathBuf::from(p),
            CertificateConfigLocation::Default => default_config_path()?,
        };
        let display = path.display();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            CredentialsError::new(
                false,
                format!("cannot read certificate configuration file '{display}'"),
                e,
            )
        })?;
        let config: CertificateConfigFile = serde_json::from_str(&content).map_err(|e| {
            CredentialsError::new(
                false,
                format!("cannot parse certificate configuration file '{display}'"),
                e,
            )
        })?;
        let workload = config.cert_configs.workload.ok_or_else(|| {
            CredentialsError::from_msg(
                false,
                format!("no workload certificate configured in '{display}'"),
            )
        })?;
        Ok(CertificatePaths {
            cert_path: workload.cert_path,
            key_path: workload.key_path,
        })
    }
}

fn default_config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CERTIFICATE_CONFIG_VAR) {
        return Ok(PathBuf::from(path));
    }
    gcloud_config_dir()
        .map(|dir| dir.join(CERTIFICATE_CONFIG_FILE))
        .ok_or_else(|| {
            CredentialsError::from_msg(
                false,
                format!("cannot find the certificate configuration, set {CERTIFICATE_CONFIG_VAR}"),
            )
        })
}

#[cfg(target_os = "windows")]
fn gcloud_config_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA").map(|d| PathBuf::from(d).join("gcloud"))
}

#[cfg(not(target_os = "windows"))]
fn gcloud_config_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|d| PathBuf::from(d).join(".config").join("gcloud"))
}
