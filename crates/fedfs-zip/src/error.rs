use fedfs::FsError;
use std::io;
use thiserror::Error;
use zip::result::ZipError;

/// Errors of the ZIP driver.
#[derive(Debug, Error)]
pub enum Error {
    /// The archive could not be parsed.
    #[error("invalid zip archive: {0}")]
    InvalidFormat(String),

    /// The archive has encrypted entries and no key is at hand.
    #[error("encrypted entry: {0}")]
    Encrypted(String),

    /// Error from the zip library.
    #[error("zip error: {0}")]
    ZipError(#[from] ZipError),

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// Invalid driver configuration.
    #[error("config error: {0}")]
    ConfigError(String),
}

/// Result type for fedfs-zip operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for FsError {
    fn from(err: Error) -> Self {
        match err {
            Error::IoError(err) | Error::ZipError(ZipError::Io(err)) => FsError::Io(err),
            Error::Encrypted(name) => FsError::KeyUnavailable(name),
            Error::ZipError(ZipError::UnsupportedArchive(msg))
                if msg == ZipError::PASSWORD_REQUIRED =>
            {
                FsError::KeyUnavailable(msg.to_string())
            }
            Error::ZipError(ZipError::FileNotFound) => {
                FsError::EntryNotFound("zip entry".to_string())
            }
            Error::ConfigError(msg) => FsError::Precondition(msg),
            other => FsError::InvalidArchive(other.to_string()),
        }
    }
}
