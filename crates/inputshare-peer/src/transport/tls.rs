//! TLS identities and fingerprint-pinned mutual authentication.
//!
//! Both sides of a session authenticate with long-term certificates and pin
//! the *remote* leaf certificate by its SHA-256 fingerprint: no CA chain is
//! consulted, a fingerprint mismatch fails the handshake. Identities come
//! from PEM files or, for development, an ephemeral self-signed certificate
//! whose fingerprint is printed at startup so the remote peer can pin it.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Errors from identity loading, pin parsing, or TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("invalid SHA-256 pin: {0}")]
    InvalidPin(String),

    #[error("certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Installs the ring crypto provider as the process default.
///
/// Required by rustls 0.23 before any config is built; a second install
/// attempt fails and is deliberately ignored.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

// ── Fingerprints and pins ─────────────────────────────────────────────────────

/// A pinned SHA-256 leaf-certificate fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSha256([u8; 32]);

impl PinSha256 {
    /// Digest of a DER-encoded certificate.
    pub fn of_cert(cert: &CertificateDer<'_>) -> Self {
        let digest = Sha256::digest(cert.as_ref());
        Self(digest.into())
    }

    /// `true` when `cert` hashes to this pin.
    pub fn matches(&self, cert: &CertificateDer<'_>) -> bool {
        Self::of_cert(cert) == *self
    }
}

impl fmt::Display for PinSha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for PinSha256 {
    type Err = TlsError;

    /// Accepts 64 hex characters, case-insensitive, with optional `:`
    /// separators (the format OpenSSL and browsers display).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != ':' && !c.is_whitespace()).collect();
        if cleaned.len() != 64 {
            return Err(TlsError::InvalidPin(format!(
                "expected 64 hex chars, got {}",
                cleaned.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &cleaned[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| TlsError::InvalidPin(format!("invalid hex pair {pair:?}")))?;
        }
        Ok(Self(bytes))
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// A local TLS identity: leaf certificate chain plus private key.
pub struct TlsIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    /// SHA-256 fingerprint of the leaf certificate.
    pub fingerprint: PinSha256,
}

impl TlsIdentity {
    /// Loads an identity from PEM certificate and key files.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::NoCertificate`] / [`TlsError::NoPrivateKey`] when
    /// the files parse but contain no usable material.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let mut cert_reader = BufReader::new(open(cert_path)?);
        let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<_, _>>()
            .map_err(|source| TlsError::Io { path: cert_path.to_path_buf(), source })?;
        let leaf = cert_chain
            .first()
            .ok_or_else(|| TlsError::NoCertificate(cert_path.to_path_buf()))?;
        let fingerprint = PinSha256::of_cert(leaf);

        let mut key_reader = BufReader::new(open(key_path)?);
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|source| TlsError::Io { path: key_path.to_path_buf(), source })?
            .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

        Ok(Self { cert_chain, key, fingerprint })
    }

    /// Generates an ephemeral self-signed identity for this process.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::CertGen`] if key or certificate generation fails.
    pub fn generate(common_name: &str) -> Result<Self, TlsError> {
        let key_pair = rcgen::KeyPair::generate()?;
        let mut params =
            rcgen::CertificateParams::new(vec!["inputshare.local".to_string(), "localhost".to_string()])?;
        params.distinguished_name.push(
            rcgen::DnType::CommonName,
            rcgen::DnValue::Utf8String(common_name.to_string()),
        );
        let cert = params.self_signed(&key_pair)?;

        let cert_der = CertificateDer::from(cert.der().to_vec());
        let fingerprint = PinSha256::of_cert(&cert_der);
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        Ok(Self {
            cert_chain: vec![cert_der],
            key,
            fingerprint,
        })
    }
}

// ── Pinned verifiers ──────────────────────────────────────────────────────────

/// Accepts exactly the server certificate matching the configured pin.
#[derive(Debug)]
struct PinnedServerVerifier {
    pin: PinSha256,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.pin.matches(end_entity) {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                observed = %PinSha256::of_cert(end_entity),
                expected = %self.pin,
                "server certificate does not match pinned fingerprint"
            );
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Requires a client certificate and accepts exactly the one matching the
/// configured pin.
#[derive(Debug)]
struct PinnedClientVerifier {
    pin: PinSha256,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for PinnedClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if self.pin.matches(end_entity) {
            Ok(ClientCertVerified::assertion())
        } else {
            tracing::warn!(
                observed = %PinSha256::of_cert(end_entity),
                expected = %self.pin,
                "client certificate does not match pinned fingerprint"
            );
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

fn default_algorithms() -> WebPkiSupportedAlgorithms {
    rustls::crypto::ring::default_provider().signature_verification_algorithms
}

// ── Connector / acceptor construction ─────────────────────────────────────────

/// Builds the outbound connector: presents `identity`, pins the remote leaf
/// to `pin`.
///
/// # Errors
///
/// Returns [`TlsError::Rustls`] when the identity material is rejected.
pub fn connector(identity: &TlsIdentity, pin: PinSha256) -> Result<TlsConnector, TlsError> {
    ensure_crypto_provider();
    let verifier = PinnedServerVerifier { pin, algorithms: default_algorithms() };
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(identity.cert_chain.clone(), identity.key.clone_key())?;
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Builds the inbound acceptor. With `Some(pin)` a client certificate is
/// required and pinned; with `None` any peer is accepted (development mode
/// for `mock-receive` only).
///
/// # Errors
///
/// Returns [`TlsError::Rustls`] when the identity material is rejected.
pub fn acceptor(identity: &TlsIdentity, pin: Option<PinSha256>) -> Result<TlsAcceptor, TlsError> {
    ensure_crypto_provider();
    let builder = rustls::ServerConfig::builder();
    let config = match pin {
        Some(pin) => {
            let verifier = PinnedClientVerifier { pin, algorithms: default_algorithms() };
            builder
                .with_client_cert_verifier(Arc::new(verifier))
                .with_single_cert(identity.cert_chain.clone(), identity.key.clone_key())?
        }
        None => builder
            .with_no_client_auth()
            .with_single_cert(identity.cert_chain.clone(), identity.key.clone_key())?,
    };
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &Path) -> Result<File, TlsError> {
    File::open(path).map_err(|source| TlsError::Io { path: path.to_path_buf(), source })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_generated_identity_has_stable_fingerprint() {
        let identity = TlsIdentity::generate("test-peer").expect("generate");
        let fp = identity.fingerprint;
        assert_eq!(
            PinSha256::of_cert(&identity.cert_chain[0]),
            fp,
            "fingerprint must be the digest of the leaf"
        );
    }

    #[test]
    fn test_distinct_identities_have_distinct_fingerprints() {
        let a = TlsIdentity::generate("a").unwrap();
        let b = TlsIdentity::generate("b").unwrap();
        assert_ne!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_pin_display_parse_round_trip() {
        let identity = TlsIdentity::generate("rt").unwrap();
        let shown = identity.fingerprint.to_string();
        assert_eq!(shown.len(), 64);
        let parsed: PinSha256 = shown.parse().expect("parse");
        assert_eq!(parsed, identity.fingerprint);
    }

    #[test]
    fn test_pin_parse_accepts_colons_and_uppercase() {
        let identity = TlsIdentity::generate("sep").unwrap();
        let shown = identity.fingerprint.to_string().to_uppercase();
        let with_colons: String = shown
            .as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join(":");
        let parsed: PinSha256 = with_colons.parse().expect("parse with colons");
        assert_eq!(parsed, identity.fingerprint);
    }

    #[test]
    fn test_pin_parse_rejects_wrong_length_and_bad_hex() {
        assert!("abcd".parse::<PinSha256>().is_err());
        assert!("zz".repeat(32).parse::<PinSha256>().is_err());
    }

    #[test]
    fn test_load_identity_from_pem_files() {
        let dir = std::env::temp_dir().join(format!("inputshare_tls_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");

        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        let identity = TlsIdentity::load(&cert_path, &key_path).expect("load");
        assert_eq!(
            identity.fingerprint,
            PinSha256::of_cert(&CertificateDer::from(cert.der().to_vec()))
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_identity_missing_file_is_io_error() {
        let missing = Path::new("/nonexistent/inputshare/cert.pem");
        assert!(matches!(
            TlsIdentity::load(missing, missing),
            Err(TlsError::Io { .. })
        ));
    }

    /// Full mutual handshake over an in-memory stream with both sides pinned
    /// correctly.
    #[tokio::test]
    async fn test_mutual_handshake_succeeds_with_matching_pins() {
        let server_id = TlsIdentity::generate("server").unwrap();
        let client_id = TlsIdentity::generate("client").unwrap();

        let acceptor = acceptor(&server_id, Some(client_id.fingerprint)).unwrap();
        let connector = connector(&client_id, server_id.fingerprint).unwrap();

        let (client_io, server_io) = tokio::io::duplex(8192);

        let server = tokio::spawn(async move {
            let mut stream = acceptor.accept(server_io).await.expect("server handshake");
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.expect("read");
            assert_eq!(&buf, b"ping");
            stream.write_all(b"pong").await.expect("write");
            // Flush through the TLS layer before dropping the stream.
            stream.flush().await.ok();
        });

        let name = ServerName::try_from("localhost".to_string()).unwrap();
        let mut stream = connector.connect(name, client_io).await.expect("client handshake");
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        server.await.unwrap();
    }

    /// The client must refuse a server whose certificate hashes to a
    /// different pin.
    #[tokio::test]
    async fn test_handshake_fails_on_server_pin_mismatch() {
        let server_id = TlsIdentity::generate("server").unwrap();
        let client_id = TlsIdentity::generate("client").unwrap();
        let unrelated = TlsIdentity::generate("unrelated").unwrap();

        let acceptor = acceptor(&server_id, Some(client_id.fingerprint)).unwrap();
        // Client pins the wrong certificate.
        let connector = connector(&client_id, unrelated.fingerprint).unwrap();

        let (client_io, server_io) = tokio::io::duplex(8192);
        let server = tokio::spawn(async move {
            let _ = acceptor.accept(server_io).await;
        });

        let name = ServerName::try_from("localhost".to_string()).unwrap();
        let result = connector.connect(name, client_io).await;
        assert!(result.is_err(), "handshake must fail on pin mismatch");
        server.await.unwrap();
    }

    /// The server must refuse a client whose certificate hashes to a
    /// different pin.
    #[tokio::test]
    async fn test_handshake_fails_on_client_pin_mismatch() {
        let server_id = TlsIdentity::generate("server").unwrap();
        let client_id = TlsIdentity::generate("client").unwrap();
        let unrelated = TlsIdentity::generate("unrelated").unwrap();

        // Server pins a certificate the client does not hold.
        let acceptor = acceptor(&server_id, Some(unrelated.fingerprint)).unwrap();
        let connector = connector(&client_id, server_id.fingerprint).unwrap();

        let (client_io, server_io) = tokio::io::duplex(8192);
        let server = tokio::spawn(async move { acceptor.accept(server_io).await.is_err() });

        let name = ServerName::try_from("localhost".to_string()).unwrap();
        // The client side may or may not observe the rejection as an error
        // depending on close timing; the server must always reject.
        let _ = connector.connect(name, client_io).await;
        assert!(server.await.unwrap(), "server must reject mismatched client cert");
    }
}
