//! Error types
//!
//! Registry validation errors live in [`crate::registry::RegistryError`]; this module
//! unifies them with media parsing and receiver failures.

use std::fmt;

use crate::registry::RegistryError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error from a source's transport or file
    Io(std::io::Error),
    /// Registry validation error
    Registry(RegistryError),
    /// H.264 bitstream error
    Media(MediaError),
    /// Receiver lifecycle error
    Receiver(ReceiverError),
    /// An operation did not complete within its deadline
    Timeout,
}

/// H.264 bitstream errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Payload does not start with a 4-byte Annex-B start code
    MissingStartCode,
    /// NAL unit is not of the expected type
    UnexpectedNalType(u8),
    /// Ran out of bits while decoding a parameter set
    Truncated,
    /// Exp-Golomb code longer than 32 bits
    InvalidExpGolomb,
    /// Parameter set field decodes to a value the picture size cannot hold
    OutOfRange(&'static str),
}

/// Receiver errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverError {
    /// URI scheme has no receiver variant
    UnsupportedScheme(String),
    /// URI could not be parsed into the form the variant needs
    InvalidUri(String),
    /// `open` called on a receiver that was already opened
    AlreadyOpened,
    /// Receiver was closed while an operation was pending
    Closed,
    /// Source reported a handshake failure
    Handshake(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Receiver(e) => write!(f, "Receiver error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::MissingStartCode => write!(f, "Missing Annex-B start code"),
            MediaError::UnexpectedNalType(t) => write!(f, "Unexpected NAL unit type: {}", t),
            MediaError::Truncated => write!(f, "Parameter set truncated"),
            MediaError::InvalidExpGolomb => write!(f, "Invalid Exp-Golomb code"),
            MediaError::OutOfRange(field) => write!(f, "Parameter set field out of range: {}", field),
        }
    }
}

impl fmt::Display for ReceiverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverError::UnsupportedScheme(s) => write!(f, "Unsupported input scheme: {}", s),
            ReceiverError::InvalidUri(uri) => write!(f, "Invalid input URI: {}", uri),
            ReceiverError::AlreadyOpened => write!(f, "Receiver already opened"),
            ReceiverError::Closed => write!(f, "Receiver closed"),
            ReceiverError::Handshake(reason) => write!(f, "Handshake failed: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for MediaError {}
impl std::error::Error for ReceiverError {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<ReceiverError> for Error {
    fn from(e: ReceiverError) -> Self {
        Error::Receiver(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
