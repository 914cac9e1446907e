// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the OS mount service
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "detail")]
pub enum ServiceError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Already mounted: {0}")]
    AlreadyMounted(String),

    #[error("Not mounted: {0}")]
    NotMounted(String),

    #[error("Authentication was cancelled")]
    AuthCancelled,

    #[error("Device is busy: {0}")]
    Busy(String),

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Operation failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeErrorKind {
    NotFound,
    NotMounted,
    AlreadyMounted,
    Ignored,
    Encrypted,
    NoFilesystem,
    NotRemovableOrEjectable,
    Busy,
    AuthCancelled,
    MonitorUnavailable,
    OsOperationFailed,
}

/// Errors surfaced by the lifecycle core to its callers
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "detail")]
pub enum VolumeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not mounted: {0}")]
    NotMounted(String),

    #[error("Device is already mounted at: {0}")]
    AlreadyMounted(String),

    #[error("Device is ignored: {0}")]
    Ignored(String),

    #[error("Device is encrypted: {0}")]
    Encrypted(String),

    #[error("Device does not have a filesystem interface: {0}")]
    NoFilesystem(String),

    #[error("Device is not removable or ejectable: {0}")]
    NotRemovableOrEjectable(String),

    #[error("Another operation is pending for {0}")]
    Busy(String),

    #[error("Authentication was cancelled")]
    AuthCancelled,

    #[error("The volume monitor is unavailable: {0}")]
    MonitorUnavailable(String),

    #[error("Mount service operation failed: {0}")]
    OsOperationFailed(ServiceError),
}

impl VolumeError {
    pub fn kind(&self) -> VolumeErrorKind {
        match self {
            Self::NotFound(_) => VolumeErrorKind::NotFound,
            Self::NotMounted(_) => VolumeErrorKind::NotMounted,
            Self::AlreadyMounted(_) => VolumeErrorKind::AlreadyMounted,
            Self::Ignored(_) => VolumeErrorKind::Ignored,
            Self::Encrypted(_) => VolumeErrorKind::Encrypted,
            Self::NoFilesystem(_) => VolumeErrorKind::NoFilesystem,
            Self::NotRemovableOrEjectable(_) => VolumeErrorKind::NotRemovableOrEjectable,
            Self::Busy(_) => VolumeErrorKind::Busy,
            Self::AuthCancelled => VolumeErrorKind::AuthCancelled,
            Self::MonitorUnavailable(_) => VolumeErrorKind::MonitorUnavailable,
            Self::OsOperationFailed(_) => VolumeErrorKind::OsOperationFailed,
        }
    }

    /// Whether the same request may succeed if issued again later.
    /// The core never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Busy(_) | Self::OsOperationFailed(ServiceError::Busy(_))
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<ServiceError> for VolumeError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => Self::NotFound(what),
            ServiceError::AlreadyMounted(at) => Self::AlreadyMounted(at),
            ServiceError::NotMounted(what) => Self::NotMounted(what),
            ServiceError::AuthCancelled => Self::AuthCancelled,
            other => Self::OsOperationFailed(other),
        }
    }
}

/// Serializable kind + message pair for transport and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: VolumeErrorKind,
    pub message: String,
}
