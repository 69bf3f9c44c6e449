// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Per-domain state.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use nre_abi::{CapSel, CpuId};
use spin::Mutex;

use super::config::ChildConfig;
use super::table::DomainHandle;
use crate::region::RegionAllocator;

/// Kernel objects the root task creates per domain: the protection domain
/// and its first execution context.
pub const OBJECTS_PER_DOMAIN: u64 = 2;

/// Lifecycle of a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DomainState {
    /// Kernel objects are being created; no context runs yet.
    Loading,
    /// The first context was started.
    Running,
    /// Unreachable through its portals; waiting for in-flight calls.
    Dying,
    /// All resources released.
    Destroyed,
}

/// Snapshot of a domain for status queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainInfo {
    /// Handle of the domain.
    pub handle: DomainHandle,
    /// Domain name.
    pub name: String,
    /// Boot command line.
    pub cmdline: String,
    /// CPU of the first context.
    pub cpu: CpuId,
    /// Lifecycle state.
    pub state: DomainState,
    /// Live contexts plus external holders.
    pub refs: usize,
    /// Bytes of memory mapped on request of the domain.
    pub mapped: u64,
    /// Protection domain selector.
    pub pd: CapSel,
    /// Selector of the first execution context.
    pub ec: CapSel,
}

/// Mutable part of a domain, guarded by the domain lock.
pub(super) struct DomainInner {
    pub state: DomainState,
    pub refs: usize,
    pub startups: usize,
    pub vspace: RegionAllocator,
    pub mappings: BTreeMap<u64, u64>,
    pub mapped: u64,
    pub io: Vec<(u64, u64)>,
    pub gsis: Vec<u32>,
}

/// A loaded child protection domain.
pub(super) struct Domain {
    pub handle: DomainHandle,
    pub config: ChildConfig,
    pub cpu: CpuId,
    /// First of [`OBJECTS_PER_DOMAIN`] selectors: PD, then first EC.
    pub objects: CapSel,
    pub entry: u64,
    pub inner: Mutex<DomainInner>,
    inflight: AtomicUsize,
    dying: AtomicBool,
    finalized: AtomicBool,
}

impl Domain {
    pub fn new(
        handle: DomainHandle,
        config: ChildConfig,
        cpu: CpuId,
        objects: CapSel,
        entry: u64,
        vspace: RegionAllocator,
    ) -> Self {
        Self {
            handle,
            config,
            cpu,
            objects,
            entry,
            inner: Mutex::new(DomainInner {
                state: DomainState::Loading,
                refs: 1,
                startups: 0,
                vspace,
                mappings: BTreeMap::new(),
                mapped: 0,
                io: Vec::new(),
                gsis: Vec::new(),
            }),
            inflight: AtomicUsize::new(0),
            dying: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
        }
    }

    pub const fn pd(&self) -> CapSel {
        self.objects
    }

    pub fn ec(&self) -> CapSel {
        CapSel::new(self.objects.as_u64() + 1)
    }

    pub fn info(&self) -> DomainInfo {
        let inner = self.inner.lock();
        DomainInfo {
            handle: self.handle,
            name: self.config.name.clone(),
            cmdline: self.config.cmdline.clone(),
            cpu: self.cpu,
            state: inner.state,
            refs: inner.refs,
            mapped: inner.mapped,
            pd: self.pd(),
            ec: self.ec(),
        }
    }

    /// Counts a portal handler that resolved this domain.
    pub fn enter(&self) {
        self.inflight.fetch_add(1, Ordering::SeqCst);
    }

    /// Ends a handler; returns true if it was the last one of a dying domain.
    pub fn leave(&self) -> bool {
        self.inflight.fetch_sub(1, Ordering::SeqCst) == 1 && self.dying.load(Ordering::SeqCst)
    }

    /// Flags the domain as dying. Called with the domain lock held.
    pub fn mark_dying(&self, inner: &mut DomainInner) {
        inner.state = DomainState::Dying;
        self.dying.store(true, Ordering::SeqCst);
    }

    /// Returns true exactly once, when the domain is dying and idle.
    pub fn claim_finalize(&self) -> bool {
        self.dying.load(Ordering::SeqCst)
            && self.inflight.load(Ordering::SeqCst) == 0
            && !self.finalized.swap(true, Ordering::SeqCst)
    }
}
