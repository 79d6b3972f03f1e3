//! Listener-wide TLS configuration: certificate material, protocol-version
//! floor and cipher policy, compiled once into a rustls [`ServerConfig`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::ring;
use rustls::{ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Lowest protocol version a listener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

impl TlsVersion {
    fn versions(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersion::Tls12 => rustls::ALL_VERSIONS,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }
}

/// The `[tls]` section of the server configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TlsSettings {
    /// Terminate TLS on the listener.
    pub enabled: bool,
    /// PEM file holding the server certificate (optionally followed by its chain).
    pub cert_file: PathBuf,
    /// PEM file holding the private key (PKCS#8, PKCS#1 or SEC1).
    pub key_file: PathBuf,
    /// Extra intermediates appended after `cert_file`'s certificates.
    pub chain_file: Option<PathBuf>,
    pub min_version: TlsVersion,
    /// Colon-separated suite names, e.g. `TLS13_AES_256_GCM_SHA384`.
    /// Empty keeps the provider defaults.
    pub cipher_list: String,
}

/// Errors raised while building the listener's TLS configuration.
#[derive(Debug, Error)]
pub enum TlsConfigError {
    #[error("failed to read certificates from {}: {source}", .path.display())]
    Certificates {
        path: PathBuf,
        #[source]
        source: pem::Error,
    },

    #[error("no certificates found in {}", .path.display())]
    NoCertificates { path: PathBuf },

    #[error("failed to read private key from {}: {source}", .path.display())]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: pem::Error,
    },

    #[error("cipher list {0:?} selects no supported suite")]
    NoCipherSuites(String),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Builds the shared rustls configuration for a TLS listener.
///
/// Uses the `ring` provider, restricted to the versions at or above
/// `settings.min_version` and to the suites named in `settings.cipher_list`.
/// No ALPN protocols are advertised, so clients offering only `h2` still
/// complete the handshake and speak HTTP/1.1.
///
/// # Errors
///
/// Fails when a PEM file cannot be read, holds no certificate or key, the
/// cipher policy selects nothing, or rustls rejects the combination.
pub fn build_server_config(settings: &TlsSettings) -> Result<Arc<ServerConfig>, TlsConfigError> {
    let mut provider = ring::default_provider();
    provider.cipher_suites = select_cipher_suites(&provider.cipher_suites, &settings.cipher_list)?;

    let mut certs = load_certs(&settings.cert_file)?;
    if let Some(chain) = &settings.chain_file {
        certs.extend(load_certs(chain)?);
    }

    let key = PrivateKeyDer::from_pem_file(&settings.key_file).map_err(|source| {
        TlsConfigError::PrivateKey {
            path: settings.key_file.clone(),
            source,
        }
    })?;

    let config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(settings.min_version.versions())?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    debug!(
        cert = %settings.cert_file.display(),
        min_version = ?settings.min_version,
        "TLS server configuration built"
    );
    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|source| TlsConfigError::Certificates {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsConfigError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Keeps the suites named in `policy`, in the provider's preference order.
fn select_cipher_suites(
    available: &[SupportedCipherSuite],
    policy: &str,
) -> Result<Vec<SupportedCipherSuite>, TlsConfigError> {
    let wanted: Vec<&str> = policy
        .split(':')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();
    if wanted.is_empty() {
        return Ok(available.to_vec());
    }

    let names: Vec<String> = available
        .iter()
        .map(|suite| format!("{:?}", suite.suite()))
        .collect();
    for name in &wanted {
        if !names.iter().any(|n| n == name) {
            warn!(suite = %name, "ignoring unknown cipher suite in cipher_list");
        }
    }

    let selected: Vec<SupportedCipherSuite> = available
        .iter()
        .zip(&names)
        .filter(|(_, name)| wanted.contains(&name.as_str()))
        .map(|(suite, _)| *suite)
        .collect();

    if selected.is_empty() {
        return Err(TlsConfigError::NoCipherSuites(policy.to_owned()));
    }
    Ok(selected)
}
