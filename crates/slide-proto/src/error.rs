use thiserror::Error;

/// Errors from stepping through the playlist.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistError {
    /// advance/retreat with no items. Callers treat this as "nothing to show".
    #[error("playlist is empty")]
    EmptyPlaylist,
}

/// A viewer payload that could not be turned into a [`Command`](crate::protocol::Command).
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::MalformedCommand(e.to_string())
    }
}
