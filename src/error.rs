//! Dereference control errors

use std::{error, fmt};

use crate::ber::BerError;

pub type Result<T> = std::result::Result<T, Error>;

/// Dereference control errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Dereference spec is missing or cannot be sent to the server
    InvalidSpecification(String),
    /// BER encoding or strict decoding failed
    Ber(BerError),
    /// Control has a different OID or carries no value
    InvalidControl,
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Ber(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BerError> for Error {
    fn from(e: BerError) -> Self {
        Error::Ber(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSpecification(e) => write!(f, "Invalid dereference specification: {}", e),
            Error::Ber(e) => write!(f, "{}", e),
            Error::InvalidControl => write!(f, "Invalid dereference control"),
        }
    }
}
