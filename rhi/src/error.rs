//! RHI error types.

use std::fmt;

/// Errors returned by fallible RHI calls.
///
/// Conditions the RHI cannot render through at all (descriptor pool exhaustion,
/// a binding layout that cannot be built) are not represented here; those panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RhiError {
    /// Null, zero-sized or otherwise malformed input to a factory or binding call.
    InvalidParameter(String),
    /// The GPU memory allocator rejected a request.
    OutOfMemory,
    /// A backend call failed for a reason not otherwise classified.
    Internal(String),
    /// Instance, adapter or logical device creation failed.
    InitializationFailed(String),
    /// A shader could not be read, parsed, validated or translated.
    ShaderCompilationFailed(String),
    /// The GPU device was lost.
    DeviceLost,
    /// The presentation surface no longer matches the window and must be resized.
    SurfaceOutdated,
}

impl fmt::Display for RhiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::SurfaceOutdated => write!(f, "surface outdated, needs resize"),
        }
    }
}

impl std::error::Error for RhiError {}

impl RhiError {
    /// Shorthand for [`RhiError::InvalidParameter`].
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Shorthand for [`RhiError::Internal`].
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
