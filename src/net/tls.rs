//! TLS side of a [`crate::net::Socket`].
//!
//! Grounded on the teacher's `TlsConnection`: TLS records are pumped
//! through `read_tls`/`write_tls`/`process_new_packets`, and the socket's
//! readiness interest is derived from `wants_read`/`wants_write` rather
//! than from whether the connection record has application data queued.

use std::{
    io::{self, BufReader, ErrorKind, Read, Write},
    sync::{Arc, Once},
};

use rustls::{
    pki_types::ServerName, ClientConfig, ClientConnection, RootCertStore, ServerConfig, ServerConnection,
};

use crate::{
    endpoint::CertBundle,
    error::{Error, Result},
};

/// Installs `ring` as the process-wide default [`rustls::crypto::CryptoProvider`].
///
/// Rustls 0.23 panics the first time a `ServerConfig`/`ClientConfig` builder
/// runs if no provider has been installed yet; every path that builds one
/// calls this first. Safe to call more than once — only the first call
/// installs anything.
fn ensure_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Builds a server [`rustls::ServerConfig`] from a [`CertBundle`]'s PEM
/// paths. `verify` controls whether client certificates are required;
/// when set, `ca_path` supplies the trust anchors.
pub fn server_config_from_bundle(bundle: &CertBundle) -> Result<Arc<ServerConfig>> {
    ensure_crypto_provider();
    let cert_path = bundle
        .cert_path
        .as_ref()
        .ok_or(Error::InvalidArgs("tls server endpoint missing cert_path"))?;
    let key_path = bundle
        .key_path
        .as_ref()
        .ok_or(Error::InvalidArgs("tls server endpoint missing key_path"))?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = ServerConfig::builder();
    let config = if bundle.verify {
        let roots = load_roots(bundle.ca_path.as_deref())?;
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|_| Error::InvalidArgs("failed to build client certificate verifier"))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let config = config
        .with_single_cert(certs, key)
        .map_err(Error::Tls)?;
    Ok(Arc::new(config))
}

/// Builds a client [`rustls::ClientConfig`] from a [`CertBundle`]'s PEM
/// paths. `verify` toggles peer certificate verification; disabling it is
/// only intended for test fixtures (spec §3's `CertBundle::verify` doc).
pub fn client_config_from_bundle(bundle: &CertBundle) -> Result<Arc<ClientConfig>> {
    ensure_crypto_provider();
    let builder = ClientConfig::builder();

    let config = if !bundle.verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
    } else {
        let roots = load_roots(bundle.ca_path.as_deref())?;
        return match (&bundle.cert_path, &bundle.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let certs = load_certs(cert_path)?;
                let key = load_key(key_path)?;
                Ok(Arc::new(
                    ClientConfig::builder()
                        .with_root_certificates(roots)
                        .with_client_auth_cert(certs, key)
                        .map_err(Error::Tls)?,
                ))
            }
            _ => Ok(Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )),
        };
    };

    Ok(Arc::new(config.with_no_client_auth()))
}

/// Builds the [`rustls::pki_types::ServerName`] a `ClientConnection` needs
/// from an endpoint's `addr`.
pub fn server_name(addr: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(addr.to_string()).map_err(|_| Error::InvalidArgs("invalid TLS server name"))
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(Error::Io)?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::Io)
}

fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(Error::Io)?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(Error::Io)?
        .ok_or_else(|| Error::InvalidArgs("no private key found in key_path PEM"))
}

fn load_roots(ca_path: Option<&str>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    if let Some(path) = ca_path {
        for cert in load_certs(path)? {
            roots.add(cert).map_err(Error::Tls)?;
        }
    }
    Ok(roots)
}

/// Disables peer certificate verification; only reachable when
/// `CertBundle::verify` is `false`, which the endpoint docs restrict to
/// test fixtures.
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Either half of a TLS connection, server or client side.
#[derive(Debug)]
pub enum TlsSide {
    /// Server-side TLS state, produced from an `Endpoint`'s [`crate::endpoint::TlsConfig`].
    Server(Box<ServerConnection>),
    /// Client-side TLS state.
    Client(Box<ClientConnection>),
}

impl TlsSide {
    /// Builds the server side of a fresh TLS session.
    pub fn new_server(config: Arc<ServerConfig>) -> Result<Self> {
        let conn = ServerConnection::new(config).map_err(Error::Tls)?;
        Ok(Self::Server(Box::new(conn)))
    }

    /// Builds the client side of a fresh TLS session for `name`.
    pub fn new_client(config: Arc<ClientConfig>, name: ServerName<'static>) -> Result<Self> {
        let conn = ClientConnection::new(config, name).map_err(Error::Tls)?;
        Ok(Self::Client(Box::new(conn)))
    }

    /// Whether the TLS layer currently wants the socket polled for reads.
    pub fn wants_read(&self) -> bool {
        match self {
            Self::Server(c) => c.wants_read(),
            Self::Client(c) => c.wants_read(),
        }
    }

    /// Whether the TLS layer has ciphertext queued to write.
    pub fn wants_write(&self) -> bool {
        match self {
            Self::Server(c) => c.wants_write(),
            Self::Client(c) => c.wants_write(),
        }
    }

    /// `true` once the handshake has completed and application data can
    /// flow in both directions.
    pub fn is_handshaking(&self) -> bool {
        match self {
            Self::Server(c) => c.is_handshaking(),
            Self::Client(c) => c.is_handshaking(),
        }
    }

    /// Reads and decrypts ciphertext from `transport` into the TLS layer's
    /// internal buffers, returning the number of ciphertext bytes consumed
    /// (0 means the peer closed the transport).
    pub fn read_tls(&mut self, transport: &mut dyn Read) -> io::Result<usize> {
        let mut total = 0;
        loop {
            let result = match self {
                Self::Server(c) => c.read_tls(transport),
                Self::Client(c) => c.read_tls(transport),
            };
            match result {
                Ok(0) => return Ok(total),
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return if total == 0 { Err(e) } else { Ok(total) }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Processes buffered ciphertext into plaintext, returning how many
    /// plaintext bytes are now available via [`TlsSide::reader`].
    pub fn process_new_packets(&mut self) -> Result<usize, rustls::Error> {
        let state = match self {
            Self::Server(c) => c.process_new_packets()?,
            Self::Client(c) => c.process_new_packets()?,
        };
        Ok(state.plaintext_bytes_to_read())
    }

    /// Reads decrypted plaintext produced by the most recent
    /// `process_new_packets` call.
    pub fn read_plaintext(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Server(c) => c.reader().read(out),
            Self::Client(c) => c.reader().read(out),
        }
    }

    /// Encrypts `data` for later transmission via [`TlsSide::write_tls`].
    pub fn write_plaintext(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Self::Server(c) => c.writer().write(data),
            Self::Client(c) => c.writer().write(data),
        }
    }

    /// Flushes queued ciphertext to `transport`.
    pub fn write_tls(&mut self, transport: &mut dyn Write) -> io::Result<usize> {
        match self {
            Self::Server(c) => c.write_tls(transport),
            Self::Client(c) => c.write_tls(transport),
        }
    }
}
