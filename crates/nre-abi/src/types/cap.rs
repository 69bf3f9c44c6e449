// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Capability selector type.

use core::fmt;

/// Capability selector in a domain's capability space.
///
/// A selector names a kernel-checked reference to an object or an invocable
/// portal. Selectors are plain integers; the kernel validates them on use.
/// Selectors handed out by the root task come from contiguous ranges so
/// that arithmetic on a selector recovers its owner (see
/// [`crate::layout::SelectorLayout`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct CapSel(u64);

impl CapSel {
    /// Null selector (never refers to an object).
    pub const NULL: Self = Self(0);

    /// Invalid selector, used as "no capability" marker in messages.
    pub const INVALID: Self = Self(u64::MAX);

    /// Creates a new selector.
    #[inline]
    #[must_use]
    pub const fn new(sel: u64) -> Self {
        Self(sel)
    }

    /// Returns the raw selector value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is the null selector.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the selector `n` positions above this one.
    ///
    /// Returns `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn offset(self, n: u64) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(sel) => Some(Self(sel)),
            None => None,
        }
    }

    /// Returns the distance from `base` to this selector.
    ///
    /// Returns `None` if this selector lies below `base`.
    #[inline]
    #[must_use]
    pub const fn distance_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl fmt::Debug for CapSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapSel({:#x})", self.0)
    }
}

impl fmt::Display for CapSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sel:{:#x}", self.0)
    }
}
