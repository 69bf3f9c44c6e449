// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Error type shared by every root task operation.

use core::fmt;

use nre_abi::{FrameError, ResultCode};

use crate::platform::KernelError;

/// Error from a root task operation.
///
/// Every variant has a [`ResultCode`] so the portal handlers can turn any
/// failure into a reply without losing the kind of error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// No service, session, domain or mapping under that identity.
    NotFound,
    /// A service with that name is already registered.
    DuplicateName,
    /// Caller does not own the object it tried to modify.
    PermissionDenied,
    /// A fixed-size table or selector range is full.
    CapacityExceeded,
    /// The image loader rejected an image.
    InvalidImage,
    /// Loading a domain failed after its image was accepted.
    LoadError,
    /// No free range of sufficient size, or a range outside the managed space.
    OutOfRange,
    /// Malformed request.
    InvalidArgs,
    /// A kernel operation failed.
    Kernel(KernelError),
}

impl Error {
    /// Returns the wire code for this error.
    #[must_use]
    pub const fn code(self) -> ResultCode {
        match self {
            Self::NotFound => ResultCode::NotFound,
            Self::DuplicateName => ResultCode::DuplicateName,
            Self::PermissionDenied => ResultCode::PermissionDenied,
            Self::CapacityExceeded => ResultCode::CapacityExceeded,
            Self::InvalidImage => ResultCode::InvalidImage,
            Self::LoadError => ResultCode::LoadError,
            Self::OutOfRange => ResultCode::OutOfRange,
            Self::InvalidArgs => ResultCode::InvalidArgs,
            Self::Kernel(_) => ResultCode::KernelError,
        }
    }

    /// Converts a reply code back into an error.
    ///
    /// Returns `None` for [`ResultCode::Success`].
    #[must_use]
    pub const fn from_code(code: ResultCode) -> Option<Self> {
        match code {
            ResultCode::Success => None,
            ResultCode::NotFound => Some(Self::NotFound),
            ResultCode::DuplicateName => Some(Self::DuplicateName),
            ResultCode::PermissionDenied => Some(Self::PermissionDenied),
            ResultCode::CapacityExceeded => Some(Self::CapacityExceeded),
            ResultCode::InvalidImage => Some(Self::InvalidImage),
            ResultCode::LoadError => Some(Self::LoadError),
            ResultCode::OutOfRange => Some(Self::OutOfRange),
            ResultCode::InvalidArgs => Some(Self::InvalidArgs),
            ResultCode::KernelError => Some(Self::Kernel(KernelError::Remote)),
        }
    }
}

impl Error {
    /// Maps the kernel failure of a portal call.
    ///
    /// Calling a revoked or never created portal means the peer is gone.
    #[must_use]
    pub const fn from_call(err: KernelError) -> Self {
        match err {
            KernelError::InvalidCapability => Self::NotFound,
            other => Self::Kernel(other),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::DuplicateName => write!(f, "name already registered"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::CapacityExceeded => write!(f, "capacity exceeded"),
            Self::InvalidImage => write!(f, "invalid image"),
            Self::LoadError => write!(f, "failed to load domain"),
            Self::OutOfRange => write!(f, "no free range available"),
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::Kernel(err) => write!(f, "kernel error: {err}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<FrameError> for Error {
    fn from(_: FrameError) -> Self {
        Self::InvalidArgs
    }
}

impl From<KernelError> for Error {
    fn from(err: KernelError) -> Self {
        Self::Kernel(err)
    }
}

impl From<ResultCode> for Error {
    /// Converts a non-success reply code.
    ///
    /// A stray [`ResultCode::Success`] maps to [`Error::InvalidArgs`], since
    /// a caller only converts codes it already knows to be failures.
    fn from(code: ResultCode) -> Self {
        Self::from_code(code).unwrap_or(Self::InvalidArgs)
    }
}
