use std::fmt;
use std::io;
use thiserror::Error;

/// Everything that can end a transfer early.
#[derive(Debug, Error)]
pub enum TftpError {
    /// A packet could not be built (empty field, embedded NUL, too long)
    #[error("cannot encode packet: {0}")]
    Encoding(String),

    /// A datagram that does not parse as a TFTP packet
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// A well-formed packet that makes no sense in the current state
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Local setup failed before any packet was exchanged
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("no reply after {retries} retransmissions")]
    TimeoutExhausted { retries: u8 },

    /// The peer aborted the transfer with an ERROR packet
    #[error("peer error {code}: {message}")]
    Peer { code: u16, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, TftpError>;

/// RFC 1350 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTransferId,
    FileAlreadyExists,
    NoSuchUser,
    Other(u16),
}

impl From<u16> for ErrorCode {
    fn from(code: u16) -> Self {
        match code {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTransferId => 5,
            ErrorCode::FileAlreadyExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::NotDefined => "not defined",
            ErrorCode::FileNotFound => "file not found",
            ErrorCode::AccessViolation => "access violation",
            ErrorCode::DiskFull => "disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "illegal TFTP operation",
            ErrorCode::UnknownTransferId => "unknown transfer ID",
            ErrorCode::FileAlreadyExists => "file already exists",
            ErrorCode::NoSuchUser => "no such user",
            ErrorCode::Other(_) => "unknown error code",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_mapping() {
        for code in 0..=7u16 {
            assert_eq!(u16::from(ErrorCode::from(code)), code);
        }
        assert_eq!(ErrorCode::from(42), ErrorCode::Other(42));
        assert_eq!(ErrorCode::from(1), ErrorCode::FileNotFound);
    }

    #[test]
    fn peer_error_display_carries_message() {
        let err = TftpError::Peer {
            code: 1,
            message: "File not found".into(),
        };
        assert_eq!(err.to_string(), "peer error 1: File not found");
    }
}
