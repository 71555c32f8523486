// FPGA Memory-Mapped DMA Rust Bindings
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for DMA operations.

use thiserror::Error;

/// Errors that can occur during DMA operations.
#[derive(Debug, Error)]
pub enum DmaError {
    /// Invalid argument provided (bad handle, bad index, bad direction).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An address or length violates a hardware alignment requirement.
    #[error("{what} {value:#x} is not aligned to {align} bytes")]
    Misaligned {
        what: &'static str,
        value: u64,
        align: u64,
    },

    /// Operation is not supported by this engine.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Engine or channel is already open.
    #[error("busy: {0}")]
    Busy(String),

    /// Hardware, thread or OS failure.
    #[error("exception: {0}")]
    Exception(String),

    /// A bounded wait gave up.
    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: &'static str, attempts: u32 },

    /// Allocation of channel state or pinned memory failed.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// No DMA feature header was found on the device.
    #[error("no DMA feature found in the device feature list")]
    FeatureNotFound,

    /// I/O error from system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory mapping failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),

    /// Platform not supported.
    #[error("platform not supported: {0}")]
    PlatformNotSupported(&'static str),
}

/// Coarse classification of a [`DmaError`], matching the result codes
/// callers of the engine are expected to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParameter,
    NotSupported,
    Busy,
    Exception,
    NoMemory,
    NotFound,
}

impl DmaError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DmaError::InvalidParameter(_) | DmaError::Misaligned { .. } => {
                ErrorKind::InvalidParameter
            }
            DmaError::NotSupported(_) | DmaError::PlatformNotSupported(_) => {
                ErrorKind::NotSupported
            }
            DmaError::Busy(_) => ErrorKind::Busy,
            DmaError::Exception(_)
            | DmaError::Timeout { .. }
            | DmaError::Io(_)
            | DmaError::MmapFailed(_) => ErrorKind::Exception,
            DmaError::NoMemory(_) => ErrorKind::NoMemory,
            DmaError::FeatureNotFound => ErrorKind::NotFound,
        }
    }

    pub(crate) fn misaligned(what: &'static str, value: u64, align: u64) -> Self {
        DmaError::Misaligned { what, value, align }
    }
}

/// Result type alias for DMA operations.
pub type DmaResult<T> = Result<T, DmaError>;
