// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Portal selector layout.
//!
//! The root task reserves one contiguous selector area for the portals of
//! all child domains. Every domain owns a fixed-size slice of that area
//! (its *stride*), and within the slice every CPU owns
//! [`PORTALS_PER_CPU`] consecutive selectors, one per [`PortalKind`]:
//!
//! ```text
//! base + domain * stride + cpu * PORTALS_PER_CPU + kind
//!
//! |<------------------ stride ------------------>|
//! | cpu0: S PF SRV MAP UNMAP IO GSI | cpu1: ... | padding |
//! ```
//!
//! The stride is `next_power_of_two(PORTALS_PER_CPU * cpu_count)` so that
//! mapping a selector back to its domain is a shift and a mask rather than
//! a search. Every component that resolves portal selectors must use
//! [`SelectorLayout`]; two diverging formulas would route calls to the
//! wrong domain.

use crate::types::{CapSel, CpuId};


/// Standard page size (4 KB).
pub const PAGE_SIZE: u64 = 4096;

/// Number of portals every domain gets on every CPU.
pub const PORTALS_PER_CPU: u64 = PortalKind::ALL.len() as u64;

/// The named portals of a domain's per-CPU portal bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum PortalKind {
    /// Startup exception of a new execution context.
    Startup = 0,
    /// Page fault (also used to signal thread exit).
    PageFault = 1,
    /// Service registry and session brokering.
    Service = 2,
    /// Map anonymous memory into the domain.
    Map = 3,
    /// Unmap previously mapped memory.
    Unmap = 4,
    /// I/O port range request.
    Io = 5,
    /// Interrupt (GSI) request.
    Gsi = 6,
}

impl PortalKind {
    /// All portal kinds, ordered by their offset within a CPU's bank.
    pub const ALL: [Self; 7] = [
        Self::Startup,
        Self::PageFault,
        Self::Service,
        Self::Map,
        Self::Unmap,
        Self::Io,
        Self::Gsi,
    ];

    /// Returns the kind at `offset` within a CPU's bank.
    #[must_use]
    pub const fn from_offset(offset: u64) -> Option<Self> {
        match offset {
            0 => Some(Self::Startup),
            1 => Some(Self::PageFault),
            2 => Some(Self::Service),
            3 => Some(Self::Map),
            4 => Some(Self::Unmap),
            5 => Some(Self::Io),
            6 => Some(Self::Gsi),
            _ => None,
        }
    }

    /// Returns the offset of this kind within a CPU's bank.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self as u64
    }
}

/// A fully resolved portal selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortalAddr {
    /// Index of the owning domain's slot.
    pub domain: u64,
    /// CPU the portal belongs to.
    pub cpu: CpuId,
    /// Which portal of the bank.
    pub kind: PortalKind,
}

/// Arithmetic over the portal selector area.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectorLayout {
    /// First selector of the area.
    base: CapSel,
    /// Number of logical CPUs with a bank.
    cpu_count: u64,
    /// Number of domain slices in the area.
    max_domains: u64,
    /// log2 of the per-domain stride.
    shift: u32,
}

impl SelectorLayout {
    /// Creates the layout for `max_domains` domains on `cpu_count` CPUs.
    ///
    /// Returns `None` if `cpu_count` is zero or exceeds
    /// [`CpuId::MAX_CPUS`], or if the area does not fit in the selector
    /// space.
    #[must_use]
    pub const fn new(base: CapSel, cpu_count: u16, max_domains: u32) -> Option<Self> {
        if cpu_count == 0 || cpu_count > CpuId::MAX_CPUS {
            return None;
        }
        let stride = Self::stride_for(cpu_count);
        let Some(size) = stride.checked_mul(max_domains as u64) else {
            return None;
        };
        if base.offset(size).is_none() {
            return None;
        }
        Some(Self {
            base,
            cpu_count: cpu_count as u64,
            max_domains: max_domains as u64,
            shift: stride.trailing_zeros(),
        })
    }

    /// Returns the per-domain stride for `cpu_count` CPUs.
    #[inline]
    #[must_use]
    pub const fn stride_for(cpu_count: u16) -> u64 {
        (PORTALS_PER_CPU * cpu_count as u64).next_power_of_two()
    }

    /// Returns the first selector of the area.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> CapSel {
        self.base
    }

    /// Returns the number of selectors each domain occupies.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> u64 {
        1 << self.shift
    }

    /// Returns the number of CPUs the layout was built for.
    #[inline]
    #[must_use]
    pub const fn cpu_count(&self) -> u64 {
        self.cpu_count
    }

    /// Returns the number of domain slices.
    #[inline]
    #[must_use]
    pub const fn max_domains(&self) -> u64 {
        self.max_domains
    }

    /// Returns the total number of selectors in the area.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.max_domains << self.shift
    }

    /// Returns the first selector of a domain's slice.
    #[must_use]
    pub const fn domain_base(&self, domain: u64) -> Option<CapSel> {
        if domain >= self.max_domains {
            return None;
        }
        self.base.offset(domain << self.shift)
    }

    /// Returns the selector of one portal of a domain's bank.
    #[must_use]
    pub const fn portal(&self, domain: u64, cpu: CpuId, kind: PortalKind) -> Option<CapSel> {
        if cpu.as_u16() as u64 >= self.cpu_count {
            return None;
        }
        let Some(base) = self.domain_base(domain) else {
            return None;
        };
        base.offset(cpu.as_u16() as u64 * PORTALS_PER_CPU + kind.offset())
    }

    /// Returns the domain index a selector belongs to.
    ///
    /// This is pure arithmetic: it does not check whether the selector is a
    /// real portal (padding selectors still map to their slice).
    #[must_use]
    pub const fn domain_of(&self, sel: CapSel) -> Option<u64> {
        let Some(off) = sel.distance_from(self.base) else {
            return None;
        };
        let domain = off >> self.shift;
        if domain >= self.max_domains {
            return None;
        }
        Some(domain)
    }

    /// Returns the CPU a portal selector belongs to.
    #[must_use]
    pub const fn cpu_of(&self, sel: CapSel) -> Option<CpuId> {
        match self.resolve(sel) {
            Some(addr) => Some(addr.cpu),
            None => None,
        }
    }

    /// Resolves a selector to its (domain, CPU, kind) triple.
    ///
    /// Returns `None` for selectors outside the area and for padding
    /// selectors that belong to no CPU.
    #[must_use]
    pub const fn resolve(&self, sel: CapSel) -> Option<PortalAddr> {
        let Some(domain) = self.domain_of(sel) else {
            return None;
        };
        let Some(off) = sel.distance_from(self.base) else {
            return None;
        };
        let within = off & (self.stride() - 1);
        let cpu = within / PORTALS_PER_CPU;
        if cpu >= self.cpu_count {
            return None;
        }
        let Some(kind) = PortalKind::from_offset(within % PORTALS_PER_CPU) else {
            return None;
        };
        let Some(cpu) = CpuId::new(cpu as u16) else {
            return None;
        };
        Some(PortalAddr { domain, cpu, kind })
    }
}
