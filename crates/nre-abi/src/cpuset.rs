// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! CPU availability bitset.
//!
//! Services announce on which CPUs they accept calls; the root task
//! announces which CPUs are enabled. Both use this fixed-width bitset,
//! which travels as a single message word.

use crate::types::CpuId;
use core::fmt;


/// A set of logical CPUs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct CpuSet(u64);

impl CpuSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Creates a set from its raw bit representation.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bit representation.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Creates the set `{0, 1, ..., count - 1}`.
    #[must_use]
    pub const fn first(count: u16) -> Self {
        if count >= CpuId::MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1u64 << count) - 1)
        }
    }

    /// Creates a set holding a single CPU.
    #[inline]
    #[must_use]
    pub const fn single(cpu: CpuId) -> Self {
        Self(1u64 << cpu.as_u16())
    }

    /// Returns this set with `cpu` added.
    #[inline]
    #[must_use]
    pub const fn with(self, cpu: CpuId) -> Self {
        Self(self.0 | (1u64 << cpu.as_u16()))
    }

    /// Adds a CPU to the set.
    #[inline]
    pub const fn insert(&mut self, cpu: CpuId) {
        self.0 |= 1u64 << cpu.as_u16();
    }

    /// Removes a CPU from the set.
    #[inline]
    pub const fn remove(&mut self, cpu: CpuId) {
        self.0 &= !(1u64 << cpu.as_u16());
    }

    /// Returns true if `cpu` is a member.
    #[inline]
    #[must_use]
    pub const fn contains(self, cpu: CpuId) -> bool {
        self.0 & (1u64 << cpu.as_u16()) != 0
    }

    /// Returns the number of members.
    #[inline]
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Returns true if the set has no members.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns the members present in both sets.
    #[inline]
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns true if every member of `self` is in `other`.
    #[inline]
    #[must_use]
    pub const fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Iterates over the members in ascending order.
    #[must_use]
    pub const fn iter(self) -> CpuSetIter {
        CpuSetIter { bits: self.0 }
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(CpuId::as_u16)).finish()
    }
}

impl IntoIterator for CpuSet {
    type Item = CpuId;
    type IntoIter = CpuSetIter;

    fn into_iter(self) -> CpuSetIter {
        self.iter()
    }
}

/// Iterator over the members of a [`CpuSet`].
#[derive(Clone, Debug)]
pub struct CpuSetIter {
    bits: u64,
}

impl Iterator for CpuSetIter {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        if self.bits == 0 {
            return None;
        }
        let idx = self.bits.trailing_zeros();
        self.bits &= self.bits - 1;
        // idx < 64 always holds for a non-zero u64
        CpuId::new(idx as u16)
    }
}
