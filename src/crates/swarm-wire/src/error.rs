//! Error types for wire-level operations

use thiserror::Error;

/// Result type for wire-level operations
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors that can occur while encoding, decoding or transporting messages
#[derive(Error, Debug)]
pub enum WireError {
    /// Attempted to read past the end of a buffer
    #[error("read of {requested} bytes at position {position} past buffer size {size}")]
    ReadPastEnd {
        position: usize,
        requested: usize,
        size: usize,
    },

    /// Attempted to seek past the buffer size
    #[error("seek to {target} past buffer size {size}")]
    SeekPastEnd { target: usize, size: usize },

    /// Attempted to seek-resize past the reserved capacity
    #[error("seek_resize to {target} past reserved capacity {reserved}")]
    SeekPastReserved { target: usize, reserved: usize },

    /// Message tag contains a character outside `0-9A-Za-z_`
    #[error("message name '{name}' contains invalid character '{ch}'")]
    InvalidNameChar { name: String, ch: char },

    /// Message tag longer than 10 characters
    #[error("message name '{0}' is longer than 10 characters")]
    NameTooLong(String),

    /// Two registered message types map to the same type code
    #[error("type code {code:#018x} of '{name}' is already registered for '{existing}'")]
    DuplicateTypeCode {
        code: u64,
        name: String,
        existing: String,
    },

    /// Type code uses the reserved top nibble
    #[error("type code {0:#018x} uses reserved bits")]
    ReservedTypeCode(u64),

    /// Decoded a type code with no registered factory
    #[error("unknown type code {0:#018x}")]
    UnknownTypeCode(u64),

    /// Response envelope carried an out-of-range requested state
    #[error("invalid requested state {0}")]
    InvalidRequestedState(i32),

    /// Inbound frame exceeds the size limit
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(u64),

    /// Operation on a channel that was already closed
    #[error("channel is closed")]
    ChannelClosed,

    /// String payload was not valid UTF-8
    #[error("string payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Transport I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WireError {
    /// True for errors that mean the peer went away (reset, EOF, broken
    /// pipe). An orderly close surfaces as EOF on Unix sockets, so both are
    /// classified together; the graceful-stop handling keys off this.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;
        match self {
            WireError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
