// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Region allocator.
//!
//! Tracks the free parts of a linear space (virtual addresses, I/O ports,
//! capability selectors) as a sorted list of disjoint ranges. Freed ranges
//! are merged with their neighbours, so after every operation no two
//! entries touch each other.
//!
//! The allocator carries no lock. Owners that share one wrap it in their
//! own mutex.

#[cfg(test)]
mod region_test;

use alloc::vec::Vec;

use crate::Error;

/// A half-open range `[addr, addr + size)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    /// First address of the range.
    pub addr: u64,
    /// Number of units in the range.
    pub size: u64,
}

impl Region {
    /// Creates a region.
    #[inline]
    #[must_use]
    pub const fn new(addr: u64, size: u64) -> Self {
        Self { addr, size }
    }

    /// Returns one past the last address.
    ///
    /// Regions held by an allocator never wrap, so this cannot overflow for
    /// them.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.addr.wrapping_add(self.size)
    }

    /// Returns true if `other` lies completely inside this region.
    #[inline]
    #[must_use]
    pub const fn covers(&self, other: &Self) -> bool {
        other.addr >= self.addr && other.end() <= self.end()
    }
}

/// Ordered free-list of a linear space.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionAllocator {
    /// Free ranges, sorted by address, never adjacent or overlapping.
    free: Vec<Region>,
}

impl RegionAllocator {
    /// Creates an allocator with no free space.
    #[must_use]
    pub const fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Creates an allocator owning `[addr, addr + size)`.
    pub fn with_range(addr: u64, size: u64) -> Result<Self, Error> {
        let mut alloc = Self::new();
        alloc.free(addr, size)?;
        Ok(alloc)
    }

    /// Returns a range to the free pool, merging it with its neighbours.
    ///
    /// A zero-sized range is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::OutOfRange`] if the range wraps around the address space
    /// - [`Error::InvalidArgs`] if any part of the range is already free
    ///
    /// The allocator is unchanged on error.
    pub fn free(&mut self, addr: u64, size: u64) -> Result<(), Error> {
        if size == 0 {
            return Ok(());
        }
        let end = addr.checked_add(size).ok_or(Error::OutOfRange)?;

        // First entry starting at or after `addr`
        let idx = self.free.partition_point(|r| r.addr < addr);

        if let Some(prev) = idx.checked_sub(1).map(|i| self.free[i])
            && prev.end() > addr
        {
            return Err(Error::InvalidArgs);
        }
        if let Some(next) = self.free.get(idx)
            && next.addr < end
        {
            return Err(Error::InvalidArgs);
        }

        let merge_prev = idx > 0 && self.free[idx - 1].end() == addr;
        let merge_next = self.free.get(idx).is_some_and(|next| next.addr == end);

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.free.remove(idx);
                self.free[idx - 1].size += size + next.size;
            }
            (true, false) => self.free[idx - 1].size += size,
            (false, true) => {
                let next = &mut self.free[idx];
                next.addr = addr;
                next.size += size;
            }
            (false, false) => self.free.insert(idx, Region::new(addr, size)),
        }
        Ok(())
    }

    /// Allocates `size` units from the lowest free range large enough.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] if `size` is zero
    /// - [`Error::OutOfRange`] if no free range is large enough
    pub fn alloc(&mut self, size: u64) -> Result<u64, Error> {
        if size == 0 {
            return Err(Error::InvalidArgs);
        }
        let idx = self
            .free
            .iter()
            .position(|r| r.size >= size)
            .ok_or(Error::OutOfRange)?;
        let region = &mut self.free[idx];
        let addr = region.addr;
        if region.size == size {
            self.free.remove(idx);
        } else {
            region.addr += size;
            region.size -= size;
        }
        Ok(addr)
    }

    /// Allocates `size` units starting at an address that is a multiple of
    /// `align`.
    ///
    /// `align` must be a power of two.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] if `size` is zero or `align` is not a power of two
    /// - [`Error::OutOfRange`] if no free range can hold an aligned block
    pub fn alloc_aligned(&mut self, size: u64, align: u64) -> Result<u64, Error> {
        if size == 0 || !align.is_power_of_two() {
            return Err(Error::InvalidArgs);
        }
        let addr = self
            .free
            .iter()
            .find_map(|r| {
                let start = r.addr.checked_add(align - 1)? & !(align - 1);
                let end = start.checked_add(size)?;
                (end <= r.end()).then_some(start)
            })
            .ok_or(Error::OutOfRange)?;
        self.remove(addr, size)?;
        Ok(addr)
    }

    /// Takes the specific range `[addr, addr + size)` out of the free pool.
    ///
    /// Used where the caller dictates the address, e.g. I/O port grants or
    /// the segments of a loaded image.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] if `size` is zero
    /// - [`Error::OutOfRange`] if the range is not completely free
    pub fn remove(&mut self, addr: u64, size: u64) -> Result<(), Error> {
        if size == 0 {
            return Err(Error::InvalidArgs);
        }
        let wanted = Region::new(addr, size);
        if addr.checked_add(size).is_none() {
            return Err(Error::OutOfRange);
        }
        let idx = self.free.partition_point(|r| r.end() <= addr);
        let Some(region) = self.free.get(idx).copied() else {
            return Err(Error::OutOfRange);
        };
        if !region.covers(&wanted) {
            return Err(Error::OutOfRange);
        }

        let head = Region::new(region.addr, addr - region.addr);
        let tail = Region::new(wanted.end(), region.end() - wanted.end());
        match (head.size > 0, tail.size > 0) {
            (true, true) => {
                self.free[idx] = head;
                self.free.insert(idx + 1, tail);
            }
            (true, false) => self.free[idx] = head,
            (false, true) => self.free[idx] = tail,
            (false, false) => {
                self.free.remove(idx);
            }
        }
        Ok(())
    }

    /// Returns true if `[addr, addr + size)` is completely free.
    #[must_use]
    pub fn is_free(&self, addr: u64, size: u64) -> bool {
        let wanted = Region::new(addr, size);
        addr.checked_add(size).is_some() && self.free.iter().any(|r| r.covers(&wanted))
    }

    /// Returns the sum of all free range sizes.
    #[must_use]
    pub fn total_free(&self) -> u64 {
        self.free.iter().map(|r| r.size).sum()
    }

    /// Returns the number of disjoint free ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Returns true if nothing is free.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Iterates over the free ranges in address order.
    pub fn iter(&self) -> impl Iterator<Item = Region> + '_ {
        self.free.iter().copied()
    }
}
