//! Error types for the streaming system

use crate::id::{IdRange, ResourceId};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for synchronous streaming operations
pub type StreamingResult<T> = std::result::Result<T, StreamingError>;

/// Result type for work done on a channel thread
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Coarse classification of a [`StreamingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Overlapping range or duplicate link
    Conflict,
    /// Unknown type or unlinked resource
    NotFound,
    /// Operation not allowed in the resource's current state
    InvalidState,
    /// A location or handler failed
    IoFailure,
}

/// Errors returned by [`StreamingManager`](crate::StreamingManager) operations
#[derive(Debug, Error)]
pub enum StreamingError {
    /// Range overlaps a registered type
    #[error("Type range {requested} overlaps registered range {existing}")]
    RangeConflict {
        requested: IdRange,
        existing: IdRange,
    },

    /// Range is empty or runs past the identifier space
    #[error("Invalid type range: base {base}, count {count}")]
    InvalidRange {
        base: ResourceId,
        count: u32,
    },

    /// No type registered at this base
    #[error("No resource type registered at base {0}")]
    TypeNotFound(ResourceId),

    /// Identifier is outside every registered range
    #[error("Resource {0} is not covered by any registered type")]
    NoTypeForId(ResourceId),

    /// Resources in the type's range still have outstanding requests
    #[error("Resource type at base {base} has {busy} resource(s) with outstanding requests")]
    TypeBusy {
        base: ResourceId,
        busy: usize,
    },

    /// Identifier already has a record
    #[error("Resource {0} is already linked")]
    AlreadyLinked(ResourceId),

    /// Identifier has no record
    #[error("Resource {0} is not linked")]
    NotLinked(ResourceId),

    /// Resource has a queued or in-flight request
    #[error("Resource {0} has an outstanding streaming request")]
    ResourceBusy(ResourceId),

    /// Resource is linked but not allowed to load
    #[error("Resource {0} is not allowed to load")]
    LoadNotAllowed(ResourceId),

    /// Request was already picked up by a channel
    #[error("Request for resource {0} has already started processing")]
    RequestStarted(ResourceId),

    /// No queued load to cancel
    #[error("No queued load request for resource {0}")]
    NoPendingRequest(ResourceId),

    /// Manager is shutting down
    #[error("Streaming manager is shutting down")]
    ShuttingDown,

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Channel thread could not be started
    #[error("Failed to spawn channel thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl StreamingError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RangeConflict { .. } | Self::InvalidRange { .. } | Self::AlreadyLinked(_) => {
                ErrorKind::Conflict
            }
            Self::TypeNotFound(_)
            | Self::NoTypeForId(_)
            | Self::NotLinked(_)
            | Self::NoPendingRequest(_) => ErrorKind::NotFound,
            Self::TypeBusy { .. }
            | Self::ResourceBusy(_)
            | Self::LoadNotAllowed(_)
            | Self::RequestStarted(_)
            | Self::ShuttingDown
            | Self::Config(_) => ErrorKind::InvalidState,
            Self::Spawn(_) => ErrorKind::IoFailure,
        }
    }
}

/// Failure while fetching or decoding a resource on a channel
#[derive(Debug, Error)]
pub enum LoadError {
    /// IO error from a location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Location produced a different number of bytes than it advertised
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        expected: usize,
        actual: usize,
    },

    /// Scratch buffer could not hold the advertised size
    #[error("Cannot allocate {size} bytes for resource data: {source}")]
    OutOfMemory {
        size: usize,
        #[source]
        source: std::collections::TryReserveError,
    },

    /// Type handler rejected the data
    #[error("Handler error: {0}")]
    Handler(String),

    /// Location or handler panicked
    #[error("Panicked: {0}")]
    Panicked(String),
}

impl LoadError {
    /// Build a handler error from any message
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// Errors from loading a [`StreamingConfig`](crate::StreamingConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let id = ResourceId(7);
        assert_eq!(StreamingError::AlreadyLinked(id).kind(), ErrorKind::Conflict);
        assert_eq!(StreamingError::NotLinked(id).kind(), ErrorKind::NotFound);
        assert_eq!(StreamingError::ResourceBusy(id).kind(), ErrorKind::InvalidState);
        assert_eq!(StreamingError::RequestStarted(id).kind(), ErrorKind::InvalidState);

        let err = StreamingError::Spawn(std::io::Error::new(std::io::ErrorKind::Other, "no threads"));
        assert_eq!(err.kind(), ErrorKind::IoFailure);

        let err = StreamingError::from(ConfigError::Validation("channel_count".into()));
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_error_display() {
        let err = StreamingError::RangeConflict {
            requested: IdRange::new(ResourceId(150), 100).unwrap(),
            existing: IdRange::new(ResourceId(100), 100).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Type range [150, 250) overlaps registered range [100, 200)"
        );

        let err = LoadError::SizeMismatch { expected: 64, actual: 32 };
        assert_eq!(err.to_string(), "Size mismatch: expected 64 bytes, got 32");
    }
}
