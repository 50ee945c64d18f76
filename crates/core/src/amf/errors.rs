use std::{io, string};

/// AMF0 encode/decode failure. Decode errors are fatal to the message.
#[derive(Debug, thiserror::Error)]
pub enum AmfError {
    #[error("unknown AMF0 marker: {0:#04x}")]
    UnknownMarker(u8),
    #[error("object end marker outside of an object")]
    UnexpectedObjectEnd,
    #[error("invalid UTF-8 string: {0}")]
    InvalidString(#[from] string::FromUtf8Error),
    #[error("string length {length} exceeds maximum {max}")]
    StringTooLong { length: usize, max: usize },
    #[error("values nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("command message is missing its {0}")]
    MalformedCommand(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
