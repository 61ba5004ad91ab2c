use std::{error::Error, fmt};

use crate::wifi::WifiSourceError;

#[derive(Debug)]
pub enum SurfaceError {
    MissingAccessToken,
    ContainerNotFound(String),
    StyleLoadFailed(String),
}

impl Error for SurfaceError {}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use SurfaceError::*;
        match self {
            MissingAccessToken => write!(f, "MissingAccessToken"),
            ContainerNotFound(s) => write!(f, "ContainerNotFound: {}", s),
            StyleLoadFailed(s) => write!(f, "StyleLoadFailed: {}", s),
        }
    }
}

#[derive(Debug)]
pub enum HandlerError {
    Surface(SurfaceError),
    WifiSource(WifiSourceError),
    Storage(anyhow::Error),
    ValidationError(String),
    Unauthorized,
    NotFound(String),
    Timeout,
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use HandlerError::*;
        match self {
            Surface(_) => write!(f, "SurfaceError"),
            WifiSource(_) => write!(f, "WifiSourceError"),
            Storage(_) => write!(f, "StorageError"),
            ValidationError(s) => write!(f, "ValidationError: {}", s),
            Unauthorized => write!(f, "Unauthorized"),
            NotFound(s) => write!(f, "NotFound: {}", s),
            Timeout => write!(f, "Timeout"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use HandlerError::*;
        match self {
            Surface(e) => Some(e),
            WifiSource(e) => Some(e),
            Storage(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<SurfaceError> for HandlerError {
    fn from(error: SurfaceError) -> Self {
        HandlerError::Surface(error)
    }
}

impl From<WifiSourceError> for HandlerError {
    fn from(error: WifiSourceError) -> Self {
        HandlerError::WifiSource(error)
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        HandlerError::Storage(error)
    }
}
