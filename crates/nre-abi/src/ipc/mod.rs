// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Portal call wire format.
//!
//! A portal call transfers one [`UtcbFrame`]. The caller fills it with a
//! command tag followed by command-specific fields, plus optional typed
//! items (delegated or translated selectors). The handler consumes the
//! input, clears the frame and writes the reply, which always starts with a
//! [`ResultCode`].
//!
//! # Service portal
//!
//! | Command | Input | Reply (after `Success`) |
//! |---------|-------|-------------------------|
//! | `Register` | name, `CpuSet`, translated portal selector | delegated binding selector |
//! | `OpenSession` | name, args | `SessionId`, delegated session selector base |
//! | `CloseSession` | name, `SessionId` | - |
//! | `Unregister` | name | - |
//!
//! # Other portals
//!
//! | Portal | Input | Reply (after `Success`) |
//! |--------|-------|-------------------------|
//! | Startup | - | entry instruction pointer |
//! | `PageFault` | `FaultInfo` | - |
//! | Map | size in bytes | address |
//! | Unmap | address | - |
//! | Io | first port, port count | - |
//! | Gsi | GSI number | - |

mod frame;

#[cfg(test)]
mod ipc_test;

pub use frame::{FRAME_BYTES, FrameReader, MAX_TYPED, TypedItem, UtcbFrame};

use crate::cpuset::CpuSet;
use crate::types::{CapSel, DomainId, SessionId};
use core::fmt;

// =============================================================================
// Command Tags
// =============================================================================

/// Command tag of a call on the service portal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum ServiceCommand {
    /// Register a service under a name.
    Register = 1,
    /// Open a session with a named service.
    OpenSession = 2,
    /// Close a previously opened session.
    CloseSession = 3,
    /// Remove a service registration.
    Unregister = 4,
}

impl ServiceCommand {
    /// Try to convert from a raw u64 value.
    #[must_use]
    pub const fn from_u64(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Register),
            2 => Some(Self::OpenSession),
            3 => Some(Self::CloseSession),
            4 => Some(Self::Unregister),
            _ => None,
        }
    }
}

// =============================================================================
// Result Codes
// =============================================================================

/// First word of every reply.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ResultCode {
    /// The call succeeded; command-specific fields follow.
    Success = 0,
    /// Name, domain or session could not be resolved.
    NotFound = 1,
    /// A service with that name is already registered.
    DuplicateName = 2,
    /// The caller does not own the object it tried to modify.
    PermissionDenied = 3,
    /// A fixed-size table or selector range is exhausted.
    CapacityExceeded = 4,
    /// The image loader rejected the image.
    InvalidImage = 5,
    /// Loading a domain failed for another reason.
    LoadError = 6,
    /// No free range of sufficient size exists.
    OutOfRange = 7,
    /// The call's input was malformed.
    InvalidArgs = 8,
    /// A kernel operation failed.
    KernelError = 9,
}

impl ResultCode {
    /// Try to convert from a raw u64 value.
    #[must_use]
    pub const fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Success),
            1 => Some(Self::NotFound),
            2 => Some(Self::DuplicateName),
            3 => Some(Self::PermissionDenied),
            4 => Some(Self::CapacityExceeded),
            5 => Some(Self::InvalidImage),
            6 => Some(Self::LoadError),
            7 => Some(Self::OutOfRange),
            8 => Some(Self::InvalidArgs),
            9 => Some(Self::KernelError),
            _ => None,
        }
    }

    /// Returns true for [`ResultCode::Success`].
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "E_SUCCESS",
            Self::NotFound => "E_NOT_FOUND",
            Self::DuplicateName => "E_EXISTS",
            Self::PermissionDenied => "E_ACCESS",
            Self::CapacityExceeded => "E_CAPACITY",
            Self::InvalidImage => "E_ELF_INVALID",
            Self::LoadError => "E_LOAD",
            Self::OutOfRange => "E_NO_SPACE",
            Self::InvalidArgs => "E_ARGS_INVALID",
            Self::KernelError => "E_KERNEL",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Word Conversion
// =============================================================================

/// A value that travels as one untyped message word.
pub trait Word: Sized {
    /// Encodes the value.
    fn to_word(self) -> u64;

    /// Decodes the value, returning `None` for out-of-range words.
    fn from_word(word: u64) -> Option<Self>;
}

impl Word for u64 {
    fn to_word(self) -> u64 {
        self
    }

    fn from_word(word: u64) -> Option<Self> {
        Some(word)
    }
}

impl Word for u32 {
    fn to_word(self) -> u64 {
        u64::from(self)
    }

    fn from_word(word: u64) -> Option<Self> {
        Self::try_from(word).ok()
    }
}

impl Word for u16 {
    fn to_word(self) -> u64 {
        u64::from(self)
    }

    fn from_word(word: u64) -> Option<Self> {
        Self::try_from(word).ok()
    }
}

impl Word for bool {
    fn to_word(self) -> u64 {
        u64::from(self)
    }

    fn from_word(word: u64) -> Option<Self> {
        match word {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }
}

impl Word for CapSel {
    fn to_word(self) -> u64 {
        self.as_u64()
    }

    fn from_word(word: u64) -> Option<Self> {
        Some(Self::new(word))
    }
}

impl Word for CpuSet {
    fn to_word(self) -> u64 {
        self.bits()
    }

    fn from_word(word: u64) -> Option<Self> {
        Some(Self::from_bits(word))
    }
}

impl Word for DomainId {
    fn to_word(self) -> u64 {
        u64::from(self.as_u32())
    }

    fn from_word(word: u64) -> Option<Self> {
        u32::try_from(word).ok().map(Self::new)
    }
}

impl Word for SessionId {
    fn to_word(self) -> u64 {
        u64::from(self.as_u32())
    }

    fn from_word(word: u64) -> Option<Self> {
        u32::try_from(word).ok().map(Self::new)
    }
}

impl Word for ServiceCommand {
    fn to_word(self) -> u64 {
        self as u64
    }

    fn from_word(word: u64) -> Option<Self> {
        Self::from_u64(word)
    }
}

impl Word for ResultCode {
    fn to_word(self) -> u64 {
        self as u64
    }

    fn from_word(word: u64) -> Option<Self> {
        Self::from_u64(word)
    }
}

// =============================================================================
// Frame Errors
// =============================================================================

/// Error while reading or writing a [`UtcbFrame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Writing would exceed the frame's untyped area.
    Overflow,
    /// Too many typed items.
    TooManyItems,
    /// Reading past the end of the input.
    Underflow,
    /// A word did not decode to the expected type.
    InvalidValue,
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// The requested typed item is not present.
    MissingItem,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow => write!(f, "message frame overflow"),
            Self::TooManyItems => write!(f, "too many typed items"),
            Self::Underflow => write!(f, "read past end of message"),
            Self::InvalidValue => write!(f, "invalid value in message"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::MissingItem => write!(f, "expected capability item is missing"),
        }
    }
}

impl core::error::Error for FrameError {}
