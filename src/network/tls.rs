//! rustls configuration for the harness listener and its peers

use crate::config::CertSource;
use crate::network::error::{NetworkError, NetworkResult};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// In-memory self-signed certificate, in both DER and PEM form
pub struct SelfSignedCert {
    pub cert_der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
    pub cert_pem: String,
    pub key_pem: String,
}

impl SelfSignedCert {
    pub fn key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

/// How a client decides whether to trust the server certificate
#[derive(Debug, Clone)]
pub enum ClientTrust {
    /// Accept any certificate (INSECURE - for testing only)
    Insecure,
    /// Trust the certificates in a PEM file
    Pem(PathBuf),
    /// Trust these DER certificates
    Der(Vec<CertificateDer<'static>>),
    /// System roots, falling back to the bundled webpki roots
    System,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Generate a self-signed certificate for the given host names
pub fn self_signed(hosts: &[String]) -> NetworkResult<SelfSignedCert> {
    let cert = rcgen::generate_simple_self_signed(hosts.to_vec())
        .map_err(|e| NetworkError::Certificate(e.to_string()))?;

    Ok(SelfSignedCert {
        cert_der: CertificateDer::from(cert.cert.der().to_vec()),
        key_der: cert.key_pair.serialize_der(),
        cert_pem: cert.cert.pem(),
        key_pem: cert.key_pair.serialize_pem(),
    })
}

/// Load a PEM certificate chain and private key from disk
pub fn load_pem_files(
    cert_path: &Path,
    key_path: &Path,
) -> NetworkResult<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            NetworkError::Certificate(format!("{}: {}", cert_path.display(), e))
        })?;
    if certs.is_empty() {
        return Err(NetworkError::Certificate(format!(
            "{}: no certificates found",
            cert_path.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|e| NetworkError::Certificate(format!("{}: {}", key_path.display(), e)))?;

    Ok((certs, key))
}

/// Build the listener's TLS configuration. Any failure here is startup-fatal.
pub fn server_config(source: &CertSource) -> NetworkResult<Arc<ServerConfig>> {
    let (certs, key) = match source {
        CertSource::Files { cert_path, key_path } => load_pem_files(cert_path, key_path)?,
        CertSource::SelfSigned { hosts } => {
            let generated = self_signed(hosts)?;
            tracing::warn!(
                "Using a generated self-signed certificate for {:?}; \
                 peers must skip verification or pin it",
                hosts
            );
            let key = generated.key();
            (vec![generated.cert_der], key)
        }
    };

    server_config_from_der(certs, key)
}

pub fn server_config_from_der(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> NetworkResult<Arc<ServerConfig>> {
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Build a client configuration for connecting to a harness server
pub fn client_config(trust: ClientTrust) -> NetworkResult<Arc<ClientConfig>> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = match trust {
        ClientTrust::Insecure => {
            tracing::warn!(
                "SECURITY WARNING: TLS certificate verification is DISABLED. \
                 Only use this against a harness with a self-signed certificate."
            );
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
                .with_no_client_auth()
        }
        ClientTrust::Pem(path) => {
            let certs = CertificateDer::pem_file_iter(&path)
                .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
                .map_err(|e| NetworkError::Certificate(format!("{}: {}", path.display(), e)))?;
            builder
                .with_root_certificates(root_store(certs)?)
                .with_no_client_auth()
        }
        ClientTrust::Der(certs) => builder
            .with_root_certificates(root_store(certs)?)
            .with_no_client_auth(),
        ClientTrust::System => builder
            .with_root_certificates(system_roots())
            .with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

fn root_store(certs: Vec<CertificateDer<'static>>) -> NetworkResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots.add(cert)?;
    }
    Ok(roots)
}

fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            for cert in certs {
                if let Err(e) = roots.add(cert) {
                    tracing::warn!("Failed to add certificate to root store: {}", e);
                }
            }
        }
        Err(e) => {
            tracing::warn!("Failed to load native certificates: {}. Using webpki roots.", e);
        }
    }

    if roots.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    roots
}

/// Certificate verifier that accepts any certificate (INSECURE - for testing only).
/// Handshake signatures are still checked.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
