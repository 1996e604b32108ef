//! Registry error types
//!
//! Validation errors returned synchronously by registry operations. None of
//! them are retried; the calling front end maps them to a protocol response.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Stream id was empty
    EmptyStreamId,
    /// URI was empty
    EmptyUri,
    /// URI lacks a `scheme://` prefix
    InvalidUri(String),
    /// Stream id already present in the registry
    StreamAlreadyExists(String),
    /// Stream not found
    StreamNotFound(String),
    /// Stream already owns a receiver
    ReceiverAlreadyAttached(String),
    /// Receiver handed to the registry was already opened elsewhere
    ReceiverAlreadyOpened(String),
    /// Session id was empty
    EmptySessionId,
    /// Session id already attached to the stream
    SessionAlreadyExists(String),
    /// Session not found on the stream
    SessionNotFound(String),
    /// Session frame queue was already handed to a consumer
    FramesAlreadyTaken(String),
    /// Output protocol is not on the allow-list
    UnsupportedProtocol(String),
    /// Output protocol already configured on the stream
    OutputAlreadyExists(String),
    /// Output protocol not configured on the stream
    OutputNotFound(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::EmptyStreamId => write!(f, "Stream id can not be empty"),
            RegistryError::EmptyUri => write!(f, "URI can not be empty"),
            RegistryError::InvalidUri(uri) => write!(f, "URI is invalid: {}", uri),
            RegistryError::StreamAlreadyExists(id) => {
                write!(f, "Stream id already in use: {}", id)
            }
            RegistryError::StreamNotFound(id) => write!(f, "Stream not found: {}", id),
            RegistryError::ReceiverAlreadyAttached(id) => {
                write!(f, "Stream already has a receiver: {}", id)
            }
            RegistryError::ReceiverAlreadyOpened(id) => {
                write!(f, "Receiver already opened for stream: {}", id)
            }
            RegistryError::EmptySessionId => write!(f, "Session id can not be empty"),
            RegistryError::SessionAlreadyExists(id) => {
                write!(f, "Session id already in use: {}", id)
            }
            RegistryError::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            RegistryError::FramesAlreadyTaken(id) => {
                write!(f, "Session frames already taken: {}", id)
            }
            RegistryError::UnsupportedProtocol(p) => {
                write!(f, "Output protocol must be rtsp, rtmp, gb28181 or dmi: {}", p)
            }
            RegistryError::OutputAlreadyExists(p) => {
                write!(f, "Output protocol already in use: {}", p)
            }
            RegistryError::OutputNotFound(p) => write!(f, "Output protocol not found: {}", p),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Check that a URI carries a `scheme://` prefix with a non-empty scheme.
pub(crate) fn validate_uri(uri: &str) -> Result<(), RegistryError> {
    if uri.is_empty() {
        return Err(RegistryError::EmptyUri);
    }

    let (scheme, _) = uri
        .split_once("://")
        .ok_or_else(|| RegistryError::InvalidUri(uri.to_string()))?;

    let mut chars = scheme.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidUri(uri.to_string()))
    }
}
