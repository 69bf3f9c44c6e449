// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the region allocator.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use alloc::vec;
use proptest::prelude::*;

fn ranges(alloc: &RegionAllocator) -> Vec<(u64, u64)> {
    alloc.iter().map(|r| (r.addr, r.size)).collect()
}

/// Checks the free-list shape: sorted, non-empty entries, never touching.
fn assert_well_formed(alloc: &RegionAllocator) {
    let regions: Vec<Region> = alloc.iter().collect();
    for r in &regions {
        assert!(r.size > 0, "empty region {r:?}");
    }
    for pair in regions.windows(2) {
        assert!(
            pair[0].end() < pair[1].addr,
            "regions {:?} and {:?} touch or overlap",
            pair[0],
            pair[1]
        );
    }
}

// ============================================================================
// Free / Merge
// ============================================================================

#[test]
fn empty_allocator() {
    let mut alloc = RegionAllocator::new();
    assert!(alloc.is_empty());
    assert_eq!(alloc.total_free(), 0);
    assert_eq!(alloc.alloc(1), Err(Error::OutOfRange));
}

#[test]
fn free_disjoint_ranges_stay_separate() {
    let mut alloc = RegionAllocator::new();
    alloc.free(0x20_0000, 0x1000).unwrap();
    alloc.free(0x10_0000, 0x3000).unwrap();
    alloc.free(0x28_0000, 0x2000).unwrap();

    assert_eq!(
        ranges(&alloc),
        vec![(0x10_0000, 0x3000), (0x20_0000, 0x1000), (0x28_0000, 0x2000)]
    );
    assert_eq!(alloc.total_free(), 0x6000);
}

#[test]
fn free_merges_with_previous() {
    let mut alloc = RegionAllocator::with_range(0x1000, 0x1000).unwrap();
    alloc.free(0x2000, 0x1000).unwrap();
    assert_eq!(ranges(&alloc), vec![(0x1000, 0x2000)]);
}

#[test]
fn free_merges_with_next() {
    let mut alloc = RegionAllocator::with_range(0x2000, 0x1000).unwrap();
    alloc.free(0x1000, 0x1000).unwrap();
    assert_eq!(ranges(&alloc), vec![(0x1000, 0x2000)]);
}

#[test]
fn free_bridges_gap() {
    let mut alloc = RegionAllocator::new();
    alloc.free(0x1000, 0x1000).unwrap();
    alloc.free(0x3000, 0x1000).unwrap();
    alloc.free(0x2000, 0x1000).unwrap();
    assert_eq!(ranges(&alloc), vec![(0x1000, 0x3000)]);
}

#[test]
fn free_zero_size_is_noop() {
    let mut alloc = RegionAllocator::new();
    alloc.free(0x1000, 0).unwrap();
    assert!(alloc.is_empty());
}

#[test]
fn double_free_rejected() {
    let mut alloc = RegionAllocator::with_range(0x1000, 0x2000).unwrap();
    let before = alloc.clone();

    assert_eq!(alloc.free(0x1800, 0x100), Err(Error::InvalidArgs));
    assert_eq!(alloc.free(0x0800, 0x1000), Err(Error::InvalidArgs));
    assert_eq!(alloc.free(0x2800, 0x1000), Err(Error::InvalidArgs));
    assert_eq!(alloc, before);
}

#[test]
fn free_wrapping_range_rejected() {
    let mut alloc = RegionAllocator::new();
    assert_eq!(alloc.free(u64::MAX - 1, 4), Err(Error::OutOfRange));
    assert!(alloc.is_empty());
}

// ============================================================================
// Alloc
// ============================================================================

#[test]
fn alloc_is_first_fit_from_lowest() {
    let mut alloc = RegionAllocator::new();
    alloc.free(0x1000, 0x1000).unwrap();
    alloc.free(0x8000, 0x4000).unwrap();

    // Too large for the first range
    assert_eq!(alloc.alloc(0x2000).unwrap(), 0x8000);
    // Fits the first range
    assert_eq!(alloc.alloc(0x800).unwrap(), 0x1000);
    assert_eq!(ranges(&alloc), vec![(0x1800, 0x800), (0xA000, 0x2000)]);
}

#[test]
fn alloc_exact_fit_removes_entry() {
    let mut alloc = RegionAllocator::with_range(0x4000, 0x1000).unwrap();
    assert_eq!(alloc.alloc(0x1000).unwrap(), 0x4000);
    assert!(alloc.is_empty());
}

#[test]
fn alloc_zero_rejected() {
    let mut alloc = RegionAllocator::with_range(0, 0x1000).unwrap();
    assert_eq!(alloc.alloc(0), Err(Error::InvalidArgs));
}

#[test]
fn alloc_failure_leaves_state_unchanged() {
    let mut alloc = RegionAllocator::new();
    alloc.free(0x1000, 0x1000).unwrap();
    alloc.free(0x3000, 0x1000).unwrap();
    let before = alloc.clone();

    // Total free is enough, but no single range is
    assert_eq!(alloc.alloc(0x1800), Err(Error::OutOfRange));
    assert_eq!(alloc, before);
}

#[test]
fn alloc_then_free_restores_original_ranges() {
    let mut alloc = RegionAllocator::new();
    alloc.free(0x10_0000, 0x3000).unwrap();
    alloc.free(0x20_0000, 0x1000).unwrap();
    alloc.free(0x28_0000, 0x2000).unwrap();

    let a = alloc.alloc(0x1000).unwrap();
    let b = alloc.alloc(0x2000).unwrap();
    let c = alloc.alloc(0x2000).unwrap();
    assert_eq!(a, 0x10_0000);
    assert_eq!(b, 0x10_1000);
    assert_eq!(c, 0x28_0000);

    alloc.free(b, 0x2000).unwrap();
    alloc.free(c, 0x2000).unwrap();
    alloc.free(a, 0x1000).unwrap();

    assert_eq!(alloc.total_free(), 0x6000);
    assert_eq!(
        ranges(&alloc),
        vec![(0x10_0000, 0x3000), (0x20_0000, 0x1000), (0x28_0000, 0x2000)]
    );
}

#[test]
fn alloc_aligned_skips_unaligned_head() {
    let mut alloc = RegionAllocator::with_range(0x1800, 0x4000).unwrap();
    assert_eq!(alloc.alloc_aligned(0x1000, 0x1000).unwrap(), 0x2000);
    assert_eq!(ranges(&alloc), vec![(0x1800, 0x800), (0x3000, 0x2800)]);
}

#[test]
fn alloc_aligned_rejects_bad_alignment() {
    let mut alloc = RegionAllocator::with_range(0, 0x4000).unwrap();
    assert_eq!(alloc.alloc_aligned(0x1000, 3), Err(Error::InvalidArgs));
}

// ============================================================================
// Remove
// ============================================================================

#[test]
fn remove_splits_range() {
    let mut alloc = RegionAllocator::with_range(0, 0x1_0000).unwrap();
    alloc.remove(0x60, 0x10).unwrap();
    assert_eq!(ranges(&alloc), vec![(0, 0x60), (0x70, 0xFF90)]);
    assert!(!alloc.is_free(0x60, 1));
    assert!(alloc.is_free(0x70, 0x10));
}

#[test]
fn remove_taken_range_fails() {
    let mut alloc = RegionAllocator::with_range(0, 0x100).unwrap();
    alloc.remove(0x10, 0x10).unwrap();
    let before = alloc.clone();

    assert_eq!(alloc.remove(0x10, 0x10), Err(Error::OutOfRange));
    assert_eq!(alloc.remove(0x08, 0x10), Err(Error::OutOfRange));
    assert_eq!(alloc.remove(0xF0, 0x20), Err(Error::OutOfRange));
    assert_eq!(alloc, before);
}

#[test]
fn remove_whole_range() {
    let mut alloc = RegionAllocator::with_range(0x100, 0x100).unwrap();
    alloc.remove(0x100, 0x100).unwrap();
    assert!(alloc.is_empty());
    alloc.free(0x100, 0x100).unwrap();
    assert_eq!(ranges(&alloc), vec![(0x100, 0x100)]);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Allocating blocks and freeing them in any order restores the start state.
    #[test]
    fn alloc_free_restores(sizes in prop::collection::vec(1u64..0x400, 1..40), seed in any::<u64>()) {
        let mut alloc = RegionAllocator::new();
        alloc.free(0x1000, 0x4000).unwrap();
        alloc.free(0x10000, 0x800).unwrap();
        alloc.free(0x20000, 0x8000).unwrap();
        let original = alloc.clone();

        let mut taken = Vec::new();
        for size in sizes {
            if let Ok(addr) = alloc.alloc(size) {
                taken.push((addr, size));
            }
            assert_well_formed(&alloc);
        }

        // Deterministic shuffle driven by the seed
        let mut state = seed | 1;
        for i in (1..taken.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            taken.swap(i, j);
        }

        for (addr, size) in taken {
            alloc.free(addr, size).unwrap();
            assert_well_formed(&alloc);
        }
        prop_assert_eq!(alloc, original);
    }

    /// Allocated blocks never overlap each other or the remaining free space.
    #[test]
    fn allocations_are_disjoint(sizes in prop::collection::vec(1u64..0x200, 1..30)) {
        let mut alloc = RegionAllocator::with_range(0, 0x2000).unwrap();
        let mut taken: Vec<Region> = Vec::new();
        for size in sizes {
            if let Ok(addr) = alloc.alloc(size) {
                let block = Region::new(addr, size);
                for other in &taken {
                    prop_assert!(block.end() <= other.addr || other.end() <= block.addr);
                }
                prop_assert!(!alloc.iter().any(|r| r.addr < block.end() && block.addr < r.end()));
                taken.push(block);
            }
        }
        let used: u64 = taken.iter().map(|r| r.size).sum();
        prop_assert_eq!(used + alloc.total_free(), 0x2000);
    }
}
