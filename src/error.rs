//! Error types for the preferences core.
//!
//! Out-of-range input is never an error here: validators clamp. What remains
//! are device, storage and pipeline failures, all of which are returned to
//! the caller and logged, but never tear down the session.

use thiserror::Error;

use crate::audio::Direction;

/// Failures of the durable storage medium.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The medium exists but refuses the write (read-only file, ACLs).
    #[error("permission denied writing settings: {0}")]
    PermissionDenied(String),

    /// The medium could not be reached at all (missing dir, disk full, I/O).
    #[error("settings medium unavailable: {0}")]
    MediumUnavailable(String),

    /// The configuration could not be encoded or decoded.
    #[error("failed to serialize settings: {0}")]
    SerializationFailure(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ReadOnlyFilesystem => {
                StoreError::PermissionDenied(err.to_string())
            }
            _ => StoreError::MediumUnavailable(err.to_string()),
        }
    }
}

impl From<toml::ser::Error> for StoreError {
    fn from(err: toml::ser::Error) -> Self {
        StoreError::SerializationFailure(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::SerializationFailure(err.to_string())
    }
}

/// A single pipeline call that did not take effect.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineApplyError {
    /// The pipeline refused one setting; the rest of the pipeline is fine.
    #[error("pipeline rejected {setting}: {reason}")]
    Rejected {
        /// Which capability was being applied.
        setting: &'static str,
        /// Backend-provided explanation.
        reason: String,
    },

    /// The pipeline is gone (device unplugged, backend crashed).
    #[error("pipeline disconnected: {0}")]
    Disconnected(String),
}

impl PipelineApplyError {
    pub fn rejected(setting: &'static str, reason: impl Into<String>) -> Self {
        PipelineApplyError::Rejected {
            setting,
            reason: reason.into(),
        }
    }

    /// Whether the binding can keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineApplyError::Rejected { .. })
    }
}

/// Errors from binding a device or parameter set.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindingError {
    /// The descriptor is not part of the last enumeration.
    #[error("{direction} device '{id}' is not present")]
    DeviceNotPresent {
        /// Identifier that was requested.
        id: String,
        /// Which side of the pipeline.
        direction: Direction,
    },

    /// The pipeline refused the device switch.
    #[error(transparent)]
    Pipeline(#[from] PipelineApplyError),

    /// The selection was applied but could not be persisted.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by [`ConfigurationSession`](crate::session::ConfigurationSession) setters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The value was stored but the pipeline did not take it.
    #[error(transparent)]
    Pipeline(#[from] PipelineApplyError),
}

impl SessionError {
    /// The storage failure behind this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            SessionError::Store(e) | SessionError::Binding(BindingError::Store(e)) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_permission_denied_maps_to_permission_denied() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "ro");
        assert!(matches!(StoreError::from(err), StoreError::PermissionDenied(_)));
    }

    #[test]
    fn other_io_errors_map_to_medium_unavailable() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(StoreError::from(err), StoreError::MediumUnavailable(_)));
    }

    #[test]
    fn rejected_is_recoverable_disconnected_is_not() {
        assert!(PipelineApplyError::rejected("noise_threshold", "nope").is_recoverable());
        assert!(!PipelineApplyError::Disconnected("unplugged".into()).is_recoverable());
    }

    #[test]
    fn device_not_present_display() {
        let err = BindingError::DeviceNotPresent {
            id: "hw:3,0".to_string(),
            direction: Direction::Input,
        };
        assert_eq!(err.to_string(), "input device 'hw:3,0' is not present");
    }

    #[test]
    fn session_error_exposes_store_error() {
        let store = StoreError::PermissionDenied("ro".into());
        let err = SessionError::from(BindingError::from(store.clone()));
        assert_eq!(err.store_error(), Some(&store));

        let err = SessionError::from(BindingError::DeviceNotPresent {
            id: "x".into(),
            direction: Direction::Output,
        });
        assert!(err.store_error().is_none());
    }
}
