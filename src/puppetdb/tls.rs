//! HTTP client construction for PuppetDB.
//!
//! Without a client certificate, a plain client verifying against the
//! system trust store is used. With one, the client presents the certificate and
//! trusts only the configured CA bundle.

use reqwest::{Certificate, Client, Identity};
use tracing::debug;

use crate::config::{ConnectionConfig, CredentialSource};
use crate::error::PuppetDbError;

/// Build the HTTP client for one request.
///
/// Certificate material is re-read on every call. Any problem with it is a
/// [`PuppetDbError::Configuration`] and no connection is attempted.
pub async fn build_http_client(config: &ConnectionConfig) -> Result<Client, PuppetDbError> {
    let builder = Client::builder()
        .use_rustls_tls()
        .timeout(config.timeout);

    let Some((cert_source, key_source)) = config.client_credential_sources()? else {
        debug!("Using plain HTTPS client with system roots");
        return builder.build().map_err(client_build_error);
    };

    let mut pem = read_pem(&cert_source, Material::ClientCertificate).await?;
    pem.push(b'\n');
    pem.extend(read_pem(&key_source, Material::ClientKey).await?);
    let identity = Identity::from_pem(&pem).map_err(|e| {
        PuppetDbError::Configuration(format!("failed to load client certificate and key: {e}"))
    })?;

    let ca_source = CredentialSource::classify(&config.ca);
    let ca_pem = read_pem(&ca_source, Material::Ca).await?;
    let roots = Certificate::from_pem_bundle(&ca_pem).map_err(|e| {
        PuppetDbError::Configuration(format!("failed to parse CA certificate: {e}"))
    })?;
    if roots.is_empty() {
        return Err(PuppetDbError::Configuration(
            "no certificates found in CA bundle".to_string(),
        ));
    }

    debug!(
        ca_certificates = roots.len(),
        cert_from_file = cert_source.is_file(),
        "Using mutual TLS client"
    );

    let builder = roots
        .into_iter()
        .fold(builder.tls_built_in_root_certs(false), |b, root| {
            b.add_root_certificate(root)
        })
        .identity(identity);

    builder.build().map_err(client_build_error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Material {
    ClientCertificate,
    ClientKey,
    Ca,
}

impl Material {
    fn describe(self) -> &'static str {
        match self {
            Self::ClientCertificate => "client certificate",
            Self::ClientKey => "client private key",
            Self::Ca => "CA certificate",
        }
    }
}

async fn read_pem(source: &CredentialSource, material: Material) -> Result<Vec<u8>, PuppetDbError> {
    let path = match source {
        CredentialSource::Inline(content) => return Ok(content.as_bytes().to_vec()),
        CredentialSource::File(path) => path,
    };
    tokio::fs::read(path).await.map_err(|e| {
        let what = material.describe();
        // Never echo where the private key lives.
        if material == Material::ClientKey {
            PuppetDbError::Configuration(format!("failed to read {what} file: {e}"))
        } else {
            PuppetDbError::Configuration(format!(
                "failed to read {what} at {}: {e}",
                path.display()
            ))
        }
    })
}

fn client_build_error(err: reqwest::Error) -> PuppetDbError {
    PuppetDbError::Configuration(format!("failed to build HTTP client: {err}"))
}
