use core::fmt;

use crate::storage::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller violated a precondition. Detected before any device call.
    InvalidInput,
    /// Register structure tag is not one this crate knows how to decode.
    UnsupportedVersion,
    /// The device handshake has not completed successfully.
    NotInitialized,
    /// Opaque failure reported by the device, forwarded unchanged.
    Device(StatusCode),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::UnsupportedVersion => write!(f, "unsupported register structure version"),
            ErrorKind::NotInitialized => write!(f, "card not initialized"),
            ErrorKind::Device(status) => write!(f, "device error {}", status.0),
        }
    }
}
