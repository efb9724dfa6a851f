use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Buffer errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The operation was interrupted by shutdown before it could take effect.
    Abort,
    /// Invalid caller input: capacity bounds out of order, or an empty value.
    InvalidParameter(String),
    /// The scratch directory could not be created or is not writable.
    Uninitialised(String),
    /// The value is larger than the disk bound and can never be stored.
    CannotExceedLimit {
        /// Size of the rejected value in bytes.
        size: u64,
        /// The disk bound at the time of the attempt.
        limit: u64,
    },
    /// An IO error.
    Io(String),
    /// The key is not present in either lane, or its write was cancelled.
    NoSuchElement,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Abort => write!(f, "operation aborted"),
            Error::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Error::Uninitialised(msg) => write!(f, "uninitialised: {msg}"),
            Error::CannotExceedLimit { size, limit } => {
                write!(f, "value of {size} bytes exceeds the {limit} byte disk bound")
            }
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::NoSuchElement => write!(f, "no such element"),
        }
    }
}

/// A buffer Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::Abort.to_string(), "operation aborted");
        assert_eq!(Error::NoSuchElement.to_string(), "no such element");
        assert_eq!(
            Error::CannotExceedLimit { size: 3, limit: 2 }.to_string(),
            "value of 3 bytes exceeds the 2 byte disk bound"
        );
        assert_eq!(
            Error::InvalidParameter("bad".to_string()).to_string(),
            "invalid parameter: bad"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }
}
