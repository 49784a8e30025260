//! TLS configuration for server and client.
//!
//! Both sides are built from PEM files with the ring crypto provider. The
//! server always presents a certificate; when a client CA is configured it
//! also requires a client certificate chaining to that CA. The client trusts
//! only the CA file it is given.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::errors::ErrorCode;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid certificate: {0}")]
    Certificate(String),

    #[error("invalid private key: {0}")]
    PrivateKey(String),

    #[error("TLS configuration error: {0}")]
    Config(String),

    #[error("invalid server name '{0}'")]
    ServerName(String),
}

impl TlsError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigTlsError
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate("no certificates found".into()));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse private key: {e}")))
}

fn root_store(ca_pem: &[u8]) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::Certificate(format!("failed to add CA certificate: {e}")))?;
    }
    Ok(roots)
}

/// Server side TLS: certificate, key and optional client CA.
#[derive(Clone)]
pub struct ServerTls {
    acceptor: TlsAcceptor,
    mutual: bool,
}

impl ServerTls {
    pub fn from_pem(
        cert_pem: &[u8],
        key_pem: &[u8],
        client_ca_pem: Option<&[u8]>,
    ) -> Result<Self, TlsError> {
        let certs = parse_certificates(cert_pem)?;
        let key = parse_private_key(key_pem)?;

        let builder = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Config(e.to_string()))?;

        let builder = match client_ca_pem {
            Some(ca_pem) => {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(root_store(ca_pem)?), provider())
                        .build()
                        .map_err(|e| TlsError::Config(format!("client verifier error: {e}")))?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let config = builder
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::Config(format!("server config error: {e}")))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
            mutual: client_ca_pem.is_some(),
        })
    }

    pub fn from_files(
        cert_file: &Path,
        key_file: &Path,
        client_ca_file: Option<&Path>,
    ) -> Result<Self, TlsError> {
        let client_ca = client_ca_file.map(read_pem).transpose()?;
        Self::from_pem(
            &read_pem(cert_file)?,
            &read_pem(key_file)?,
            client_ca.as_deref(),
        )
    }

    pub fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    /// True when clients must present a certificate.
    pub fn requires_client_cert(&self) -> bool {
        self.mutual
    }
}

impl fmt::Debug for ServerTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTls")
            .field("mutual", &self.mutual)
            .finish_non_exhaustive()
    }
}

/// Client side TLS: trusted CA, optional identity, optional SNI override.
#[derive(Clone)]
pub struct ClientTls {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl ClientTls {
    /// Trust `ca_pem`; present `identity` (cert, key) when the server asks.
    pub fn from_pem(ca_pem: &[u8], identity: Option<(&[u8], &[u8])>) -> Result<Self, TlsError> {
        let builder = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Config(e.to_string()))?
            .with_root_certificates(root_store(ca_pem)?);

        let config = match identity {
            Some((cert_pem, key_pem)) => builder
                .with_client_auth_cert(parse_certificates(cert_pem)?, parse_private_key(key_pem)?)
                .map_err(|e| TlsError::Config(format!("client config error: {e}")))?,
            None => builder.with_no_client_auth(),
        };

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name: None,
        })
    }

    pub fn from_files(ca_file: &Path, identity: Option<(&Path, &Path)>) -> Result<Self, TlsError> {
        let ca = read_pem(ca_file)?;
        match identity {
            Some((cert_file, key_file)) => {
                let cert = read_pem(cert_file)?;
                let key = read_pem(key_file)?;
                Self::from_pem(&ca, Some((&cert, &key)))
            }
            None => Self::from_pem(&ca, None),
        }
    }

    /// Verify the server against `name` instead of the connect host.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    /// Name checked against the server certificate when dialing `host`.
    pub fn server_name(&self, host: &str) -> Result<ServerName<'static>, TlsError> {
        let name = self.server_name.as_deref().unwrap_or(host).to_string();
        ServerName::try_from(name.clone()).map_err(|_| TlsError::ServerName(name))
    }
}

impl fmt::Debug for ClientTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
