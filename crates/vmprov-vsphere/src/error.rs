//! Error types for the provisioning core.

use std::fmt;

/// Categorised error kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VsphereErrorKind {
    /// Named inventory object absent
    NotFound,
    /// Inventory path maps to more than one object
    AmbiguousPath,
    /// No free unit number left on the disk controller
    CapacityExceeded,
    /// Device to edit / remove (or required controller) absent
    DeviceNotFound,
    /// Task terminated in the error state on vCenter
    TaskFailed,
    /// Poll deadline exceeded
    Timeout,
    /// Run or wait aborted through the cancellation token
    Cancelled,
    /// Request rejected before anything was submitted
    InvalidSpec,
    /// JSON parse / deserialization error
    ParseError,
}

/// Crate error type carrying a kind + human-readable message.
#[derive(Debug, Clone)]
pub struct VsphereError {
    pub kind: VsphereErrorKind,
    pub message: String,
}

impl VsphereError {
    pub fn new(kind: VsphereErrorKind, msg: impl Into<String>) -> Self {
        Self { kind, message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::NotFound, msg)
    }

    pub fn ambiguous_path(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::AmbiguousPath, msg)
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::CapacityExceeded, msg)
    }

    pub fn device_not_found(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::DeviceNotFound, msg)
    }

    /// Wraps the remote fault message verbatim.
    pub fn task_failed(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::TaskFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::Timeout, msg)
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::Cancelled, msg)
    }

    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::InvalidSpec, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(VsphereErrorKind::ParseError, msg)
    }

    pub fn is_kind(&self, kind: VsphereErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for VsphereError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl std::error::Error for VsphereError {}

impl From<VsphereError> for String {
    fn from(e: VsphereError) -> String {
        e.to_string()
    }
}

impl From<serde_json::Error> for VsphereError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("JSON parse error: {e}"))
    }
}

/// Convenience alias.
pub type VsphereResult<T> = Result<T, VsphereError>;
