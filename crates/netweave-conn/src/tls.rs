//! TLS configuration and the non-blocking handshake drive.
//!
//! rustls is sans-io, which fits the poll loop: each tick the session is
//! asked what it wants (`wants_write`, else peer input) and fed one round of
//! socket I/O, so a handshake in flight never blocks other connections. Client verification defaults to none (game servers rarely
//! carry WebPKI certificates); supplying trust roots in
//! `Config::trusted_certificates` switches on real verification.

use std::{
    io,
    net::{Ipv4Addr, TcpStream},
    sync::Arc,
};

use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
};

use netweave_core::{ErrorKind, Result};

/// Builds the client-side TLS configuration shared by all outbound
/// connections.
///
/// With no trust roots, server certificates are accepted without
/// verification; otherwise they must chain to one of the supplied PEM roots.
pub fn build_client_config(trusted: &[String]) -> Result<Arc<ClientConfig>> {
    let config = if trusted.is_empty() {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        for pem in trusted {
            for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
                let cert = cert.map_err(|_| ErrorKind::InvalidPem("certificate"))?;
                roots.add(cert).map_err(|err| ErrorKind::Tls(err.to_string()))?;
            }
        }
        ClientConfig::builder().with_root_certificates(roots).with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Builds a listener's server-side TLS configuration from PEM text.
pub fn build_server_config(cert_pem: &str, key_pem: &str) -> Result<Arc<ServerConfig>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<io::Result<_>>()
        .map_err(|_| ErrorKind::InvalidPem("certificate"))?;
    if certs.is_empty() {
        return Err(ErrorKind::InvalidPem("certificate"));
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|_| ErrorKind::InvalidPem("private key"))?
        .ok_or(ErrorKind::InvalidPem("private key"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| ErrorKind::Tls(err.to_string()))?;
    Ok(Arc::new(config))
}

/// One TLS session bound to one stream.
pub struct TlsSession {
    pub(crate) session: rustls::Connection,
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSession")
            .field("handshaking", &self.session.is_handshaking())
            .finish()
    }
}

impl TlsSession {
    /// Creates a client session targeting `ip`.
    pub fn client(config: Arc<ClientConfig>, ip: Ipv4Addr) -> Result<Self> {
        let name = ServerName::IpAddress(rustls::pki_types::IpAddr::from(std::net::IpAddr::V4(ip)));
        let session = rustls::ClientConnection::new(config, name)
            .map_err(|err| ErrorKind::Tls(err.to_string()))?;
        Ok(Self { session: rustls::Connection::Client(session) })
    }

    /// Creates a server session for an accepted stream.
    pub fn server(config: Arc<ServerConfig>) -> Result<Self> {
        let session = rustls::ServerConnection::new(config)
            .map_err(|err| ErrorKind::Tls(err.to_string()))?;
        Ok(Self { session: rustls::Connection::Server(session) })
    }

    /// Returns true while the handshake is incomplete.
    pub fn is_handshaking(&self) -> bool {
        self.session.is_handshaking()
    }

    /// Advances the handshake with at most one read and one write round.
    ///
    /// `Ok(true)` when the handshake (including certificate verification)
    /// completed; `Ok(false)` when it needs more socket readiness. A
    /// verification failure surfaces from `process_new_packets` as an error.
    pub fn drive_handshake(&mut self, stream: &mut TcpStream) -> io::Result<bool> {
        while self.session.is_handshaking() {
            if self.session.wants_write() {
                match self.session.write_tls(stream) {
                    Ok(_) => continue,
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                    Err(err) => return Err(err),
                }
            }
            // No pending flight to write, so the next step is peer input.
            match self.session.read_tls(stream) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed during tls handshake",
                    ));
                }
                Ok(_) => {
                    self.session
                        .process_new_packets()
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(err),
            }
        }

        // Flush the tail of the final flight.
        while self.session.wants_write() {
            match self.session.write_tls(stream) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}

/// Certificate verifier that accepts any server certificate.
///
/// Signatures are still checked; only the chain-of-trust step is skipped.
#[derive(Debug)]
struct AcceptAnyServerCert {
    supported: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            supported: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.supported_schemes()
    }
}
