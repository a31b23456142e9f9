use crate::calendar::{ConversionError, DatasetError};
use crate::codec::CodecError;
use crate::notification::NotificationError;
use crate::persistence::StoreError;
use serde::Serialize;

/// Coarse classification shared by every error in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InvalidTransition,
    OutOfRange,
    TransientIo,
    Parse,
    Conflict,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Parse => "parse",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Storage => "storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientIo)
    }
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for ConversionError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::InvalidFormat(_) => ErrorKind::Validation,
            ConversionError::OutOfRange(_) => ErrorKind::OutOfRange,
        }
    }
}

impl Classify for CodecError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Parse
    }
}

impl Classify for DatasetError {
    fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::TransientIo
        } else {
            ErrorKind::Parse
        }
    }
}

impl Classify for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::VersionConflict { .. } => ErrorKind::Conflict,
            StoreError::Serialization(_) => ErrorKind::Parse,
            _ if self.is_transient() => ErrorKind::TransientIo,
            _ => ErrorKind::Storage,
        }
    }
}

impl Classify for NotificationError {
    fn kind(&self) -> ErrorKind {
        match self {
            NotificationError::MissingParty(_) => ErrorKind::Validation,
            NotificationError::Delivery(_) => ErrorKind::TransientIo,
        }
    }
}
