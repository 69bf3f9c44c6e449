// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Capability selector allocator.
//!
//! Manages the selectors of the root task's own capability space that are
//! not part of the portal area: protection domains, execution contexts,
//! semaphores and other kernel objects the root task creates. Selectors
//! are recycled when a domain is destroyed, so the allocator is backed by
//! a [`RegionAllocator`] instead of a bump pointer.


use nre_abi::CapSel;

use crate::Error;
use crate::region::RegionAllocator;

/// Allocator for selectors in the root task's capability space.
#[derive(Clone, Debug)]
pub struct SlotAllocator {
    free: RegionAllocator,
    start: u64,
    end: u64,
}

impl SlotAllocator {
    /// Creates an allocator for the selectors `[start, end)`.
    pub fn new(start: CapSel, end: CapSel) -> Result<Self, Error> {
        let (start, end) = (start.as_u64(), end.as_u64());
        let size = end.checked_sub(start).ok_or(Error::InvalidArgs)?;
        Ok(Self {
            free: RegionAllocator::with_range(start, size)?,
            start,
            end,
        })
    }

    /// Allocates a single selector.
    pub fn alloc(&mut self) -> Result<CapSel, Error> {
        self.alloc_range(1)
    }

    /// Allocates `count` contiguous selectors and returns the first.
    pub fn alloc_range(&mut self, count: u64) -> Result<CapSel, Error> {
        match self.free.alloc(count) {
            Ok(sel) => Ok(CapSel::new(sel)),
            Err(Error::OutOfRange) => Err(Error::CapacityExceeded),
            Err(err) => Err(err),
        }
    }

    /// Returns a selector to the pool.
    pub fn free(&mut self, sel: CapSel) -> Result<(), Error> {
        self.free_range(sel, 1)
    }

    /// Returns `count` contiguous selectors starting at `sel`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgs`] if the range lies outside the managed selectors
    /// or is partly free already.
    pub fn free_range(&mut self, sel: CapSel, count: u64) -> Result<(), Error> {
        let first = sel.as_u64();
        let last = first.checked_add(count).ok_or(Error::InvalidArgs)?;
        if first < self.start || last > self.end {
            return Err(Error::InvalidArgs);
        }
        self.free.free(first, count)
    }

    /// Returns the number of free selectors.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.free.total_free()
    }

    /// Returns true if no selector is free.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }
}
