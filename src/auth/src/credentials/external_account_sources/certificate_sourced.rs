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

//! Subject tokens for x509 (mTLS) workload identity federation.
//!
//! The subject token is a JSON array with the base64-encoded DER of the
//! workload certificate, followed by any intermediate certificates from the
//! trust chain file, in file order.

use crate::Result;
use crate::credentials::certificate_config::{
    CertificateConfigLocation, CertificatePathResolver, CertificatePaths,
};
use crate::credentials::internal::spaced_json;
use crate::errors::CredentialsError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls_pki_types::CertificateDer;
use std::io::ErrorKind;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub(crate) struct CertificateSourcedCredentials {
    location: CertificateConfigLocation,
    trust_chain_path: Option<String>,
    resolver: Arc<dyn CertificatePathResolver>,
}

impl CertificateSourcedCredentials {
    pub(crate) fn new(
        location: CertificateConfigLocation,
        trust_chain_path: Option<String>,
        resolver: Arc<dyn CertificatePathResolver>,
    ) -> Self {
        Self {
            location,
            trust_chain_path,
            resolver,
        }
    }

    pub(crate) fn location(&self) -> &CertificateConfigLocation {
        &self.location
    }

    pub(crate) fn trust_chain_path(&self) -> Option<&str> {
        self.trust_chain_path.as_deref()
    }

    /// The workload certificate and key, used to configure mTLS transports.
    pub(crate) fn cert_and_key_paths(&self) -> Result<CertificatePaths> {
        self.resolver.resolve(&self.location)
    }

    pub(crate) async fn subject_token(&self) -> Result<String> {
        let paths = self.cert_and_key_paths()?;
        let leaf = read_leaf_certificate(&paths.cert_path).await?;
        let mut chain = vec![STANDARD.encode(leaf.as_ref())];
        if let Some(path) = &self.trust_chain_path {
            let leaf_key = public_key(&leaf)?;
            let certs = read_trust_chain(path).await?;
            for (i, cert) in certs.iter().enumerate() {
                if public_key(cert)? == leaf_key {
                    if i == 0 {
                        continue;
                    }
                    return Err(CredentialsError::from_msg(
                        false,
                        "The leaf certificate must be at the top of the trust chain file",
                    ));
                }
                chain.push(STANDARD.encode(cert.as_ref()));
            }
        }
        spaced_json::to_string(&chain).map_err(|e| {
            CredentialsError::new(false, "cannot encode the certificate chain", e)
        })
    }
}

async fn read_leaf_certificate(path: &str) -> Result<CertificateDer<'static>> {
    let contents = tokio::fs::read(path).await.map_err(|e| {
        CredentialsError::new(false, format!("cannot read certificate file '{path}'"), e)
    })?;
    let mut slice = contents.as_slice();
    let mut certs = rustls_pemfile::certs(&mut slice);
    match certs.next() {
        Some(Ok(cert)) => Ok(cert),
        Some(Err(e)) => Err(CredentialsError::new(
            false,
            format!("cannot parse certificate file '{path}'"),
            e,
        )),
        None => Err(CredentialsError::from_msg(
            false,
            format!("no certificate found in '{path}'"),
        )),
    }
}

async fn read_trust_chain(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let contents = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => {
            CredentialsError::from_msg(false, format!("Trust chain file '{path}' was not found."))
        }
        _ => CredentialsError::new(false, format!("cannot read trust chain file '{path}'"), e),
    })?;
    let load_error = || {
        format!("Error loading PEM certificates from the trust chain file '{path}'")
    };
    let certs = rustls_pemfile::certs(&mut contents.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CredentialsError::new(false, load_error(), e))?;
    if certs.is_empty() {
        return Err(CredentialsError::from_msg(false, load_error()));
    }
    Ok(certs)
}

/// The DER-encoded `SubjectPublicKeyInfo` of `cert`.
fn public_key(cert: &CertificateDer<'_>) -> Result<Vec<u8>> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| CredentialsError::new(false, "cannot parse x509 certificate", e))?;
    Ok(parsed.public_key().raw.to_vec())
}
