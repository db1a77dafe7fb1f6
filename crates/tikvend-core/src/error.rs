// ── Core error types ──
//
// User-facing errors from tikvend-core. Consumers never see raw
// protocol errors -- device failures are translated into
// domain-appropriate variants with the device identity attached, so a
// job-boundary log line can always say which router misbehaved.

use thiserror::Error;

use crate::model::DeviceId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation errors (rejected synchronously, never retried) ────
    #[error("validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    // ── Conflict errors ──────────────────────────────────────────────
    #[error("principal '{username}' already exists")]
    Conflict { username: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{entity} not found: {identifier}")]
    NotFound { entity: String, identifier: String },

    // ── Device errors ────────────────────────────────────────────────
    #[error("device {device} unreachable: {reason}")]
    DeviceUnreachable { device: DeviceId, reason: String },

    #[error("device {device} rejected command: {message}")]
    DeviceCommand { device: DeviceId, message: String },

    // ── Store errors ─────────────────────────────────────────────────
    #[error("store error: {message}")]
    Store { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Translate an API-layer error, attaching the device identity.
    ///
    /// Transient transport failures become [`DeviceUnreachable`]
    /// (logged, retried on a later tick); everything else becomes
    /// [`DeviceCommand`].
    ///
    /// [`DeviceUnreachable`]: CoreError::DeviceUnreachable
    /// [`DeviceCommand`]: CoreError::DeviceCommand
    pub fn device(device: &DeviceId, err: tikvend_api::Error) -> Self {
        if err.is_transient() {
            Self::DeviceUnreachable {
                device: device.clone(),
                reason: err.to_string(),
            }
        } else {
            Self::DeviceCommand {
                device: device.clone(),
                message: err.to_string(),
            }
        }
    }

    /// Returns `true` if retrying on a later tick could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DeviceUnreachable { .. })
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            identifier: identifier.into(),
        }
    }
}
