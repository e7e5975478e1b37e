use std::{fmt, io};

/// Convenience alias for results produced inside the library.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Errors raised by internal operations.
///
/// None of these escape to the host through the public API; every failure a
/// caller can observe becomes a message on the inbound queue. The variants
/// here exist so internal code can propagate with `?` and log precisely.
#[derive(Debug)]
pub enum ErrorKind {
    /// An I/O operation on a socket failed.
    Io(io::Error),
    /// TLS configuration or session processing failed.
    Tls(String),
    /// A PEM blob could not be parsed into the expected item.
    InvalidPem(&'static str),
    /// A listener was given a certificate without a key, or vice versa.
    CertificateKeyMismatch,
    /// A handle pool has no free slots left.
    CapacityExhausted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Io(err) => write!(f, "i/o error: {}", err),
            ErrorKind::Tls(reason) => write!(f, "tls error: {}", reason),
            ErrorKind::InvalidPem(what) => write!(f, "invalid pem: expected {}", what),
            ErrorKind::CertificateKeyMismatch => {
                write!(f, "certificate and private key must both be provided")
            }
            ErrorKind::CapacityExhausted => write!(f, "handle pool capacity exhausted"),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(err)
    }
}
