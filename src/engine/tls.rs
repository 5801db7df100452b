//! TLS certificate loading.
//!
//! Certificates and keys are read from PEM files before any socket is bound,
//! so a bad key pair never leaves a half-open listener behind.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

/// ALPN protocol advertised when none is configured.
pub const DEFAULT_ALPN: &str = "http/1.1";

/// Errors that can occur while loading a certificate/key pair.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid certificate/key pair: {0}")]
    Rustls(#[from] rustls::Error),
}

/// TLS options for a server, minus the key material.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// ALPN protocols to negotiate. Empty means [`DEFAULT_ALPN`].
    pub alpn: Vec<String>,
}

impl TlsOptions {
    fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        if self.alpn.is_empty() {
            vec![DEFAULT_ALPN.as_bytes().to_vec()]
        } else {
            self.alpn.iter().map(|p| p.as_bytes().to_vec()).collect()
        }
    }

    /// Load a certificate chain and private key from PEM files.
    pub fn load_pem_files(
        &self,
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<TlsAcceptor, TlsError> {
        let cert_file = File::open(cert_path).map_err(|source| TlsError::Read {
            path: cert_path.to_path_buf(),
            source,
        })?;
        let key_file = File::open(key_path).map_err(|source| TlsError::Read {
            path: key_path.to_path_buf(),
            source,
        })?;

        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(cert_file))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| TlsError::Read {
                    path: cert_path.to_path_buf(),
                    source,
                })?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
        }

        let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .map_err(|source| TlsError::Read {
                path: key_path.to_path_buf(),
                source,
            })?
            .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

        self.acceptor(certs, key)
    }

    /// Build an acceptor from in-memory certificates and key.
    pub fn acceptor(
        &self,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<TlsAcceptor, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        config.alpn_protocols = self.alpn_protocols();

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}
