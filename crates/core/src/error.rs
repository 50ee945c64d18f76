//! Error types for the publishing core.

use std::fmt;

use crate::amf::AmfError;

/// Errors that can occur while publishing media.
///
/// Variants map to the failure modes of the stack:
///
/// - **Transport**: [`Io`](Self::Io), [`NotConnected`](Self::NotConnected).
/// - **Decode**: [`Parse`](Self::Parse), [`Amf`](Self::Amf),
///   [`InvalidInterleavedHeader`](Self::InvalidInterleavedHeader).
/// - **Signaling**: [`AuthRequired`](Self::AuthRequired),
///   [`AuthFailed`](Self::AuthFailed),
///   [`UnexpectedStatus`](Self::UnexpectedStatus),
///   [`MissingParameterSets`](Self::MissingParameterSets),
///   [`MissingAudioConfig`](Self::MissingAudioConfig).
/// - **Session**: [`NotPrepared`](Self::NotPrepared),
///   [`ActiveSession`](Self::ActiveSession).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Media was sent before the connection finished its handshake.
    #[error("not connected")]
    NotConnected,

    /// Failed to parse a message received from the server.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// AMF0 encode/decode failure.
    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    /// An interleaved frame did not start with the `$` marker.
    #[error("invalid interleaved header marker: {0:#04x}")]
    InvalidInterleavedHeader(u8),

    /// The server demanded authentication but no credentials were configured.
    #[error("authentication required")]
    AuthRequired,

    /// The server rejected the configured credentials.
    #[error("authentication failed")]
    AuthFailed,

    /// The server answered a request with a non-success status.
    #[error("{method} failed: {status} {reason}")]
    UnexpectedStatus {
        method: &'static str,
        status: u16,
        reason: String,
    },

    /// Video parameter sets were not known before the connect deadline.
    #[error("sps or pps is null")]
    MissingParameterSets,

    /// An audio-only publish started before the audio format was known.
    #[error("audio format is not set")]
    MissingAudioConfig,

    /// Streaming or recording was started before any track was prepared.
    #[error("prepare_audio or prepare_video must succeed first")]
    NotPrepared,

    /// Reconfiguration was attempted while streaming or recording.
    #[error("cannot {0} while streaming or recording")]
    ActiveSession(&'static str),
}

/// Specific kind of parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no status line).
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The endpoint could not be split into host, port and path.
    InvalidEndpoint,
    /// Response head or body larger than the reader accepts.
    TooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidEndpoint => write!(f, "invalid endpoint"),
            Self::TooLarge => write!(f, "message too large"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
