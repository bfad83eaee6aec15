#![forbid(unsafe_code)]
//! Error types for amifs.
//!
//! Defines `AdfError` and a `Result<T>` alias used throughout the workspace,
//! with errno mappings for FUSE response codes.

use amifs_types::ParseError;
use thiserror::Error;

/// Unified error type for all amifs operations.
#[derive(Debug, Error)]
pub enum AdfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid ADF image: {0}")]
    InvalidImage(String),

    #[error("block {0} out of range")]
    BlockOutOfRange(u32),

    #[error("no such entry: {0}")]
    NoEntry(String),

    #[error("file exists")]
    Exists,

    #[error("not a directory")]
    NotDirectory,

    #[error("is a directory")]
    IsDirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("name too long")]
    NameTooLong,

    #[error("no space left on volume")]
    NoSpace,

    #[error("read-only volume")]
    ReadOnly,

    #[error("invalid operation: {0}")]
    Invalid(&'static str),
}

impl AdfError {
    /// Convert this error into a POSIX errno suitable for FUSE replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::InvalidImage(_) | Self::BlockOutOfRange(_) => libc::EIO,
            Self::NoEntry(_) => libc::ENOENT,
            Self::Exists => libc::EEXIST,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NoSpace => libc::ENOSPC,
            Self::ReadOnly => libc::EROFS,
            Self::Invalid(_) => libc::EINVAL,
        }
    }
}

impl From<ParseError> for AdfError {
    fn from(err: ParseError) -> Self {
        Self::InvalidImage(err.to_string())
    }
}

/// Result alias using `AdfError`.
pub type Result<T> = std::result::Result<T, AdfError>;
