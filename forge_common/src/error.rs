use std::io;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Build-wide error type.
///
/// Every fallible operation in the build system returns this; compiler
/// failures inside a dependency node fault the whole build through
/// [`crate::jobs::FaultState`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("not implemented")]
    NotImplemented,
    #[error("internal error")]
    Internal,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("key not found")]
    KeyNotFound,
    #[error("invalid unicode")]
    InvalidUnicode,
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("invalid c string literal")]
    InvalidCString,
    #[error("unexpected end of stream")]
    EndOfStream,
    #[error("read failed: {0}")]
    IoRead(io::Error),
    #[error("write failed: {0}")]
    IoWrite(io::Error),
    #[error("seek failed: {0}")]
    IoSeek(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to open '{0}'")]
    FileOpen(String),
    #[error("decompression failed")]
    Decompression,
    #[error("malformed file")]
    MalformedFile,
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("{path} [{line}:{col}] {message}")]
    TextParse {
        path: String,
        line: usize,
        col: usize,
        message: String,
    },
    #[error("format error")]
    Format,
    #[error("build faulted: {0}")]
    Faulted(Arc<Error>),
}

impl Error {
    /// Stable process exit code for this error kind, always negative.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::OutOfMemory => -1,
            Error::InvalidParameter(_) => -2,
            Error::NotImplemented => -3,
            Error::Internal => -4,
            Error::IntegerOverflow => -5,
            Error::KeyNotFound => -6,
            Error::InvalidUnicode => -7,
            Error::InvalidPath(_) => -8,
            Error::InvalidCString => -9,
            Error::EndOfStream => -10,
            Error::IoRead(_) => -11,
            Error::IoWrite(_) => -12,
            Error::IoSeek(_) => -13,
            Error::Io(_) => -14,
            Error::FileOpen(_) => -15,
            Error::Decompression => -16,
            Error::MalformedFile => -17,
            Error::OperationFailed(_) => -18,
            Error::TextParse { .. } => -19,
            Error::Format => -20,
            Error::Faulted(inner) => inner.exit_code(),
        }
    }
}
