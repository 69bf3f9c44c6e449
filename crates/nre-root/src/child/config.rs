// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Child manager and per-domain configuration.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use nre_abi::{CapSel, CpuId, CpuSet, PAGE_SIZE, SelectorLayout, THREAD_EXIT};

use crate::Error;

// =============================================================================
// Manager Configuration
// =============================================================================

/// Default number of domain slots.
pub const DEFAULT_MAX_DOMAINS: u32 = 32;

/// Default first selector of the portal area.
pub const DEFAULT_PORTAL_BASE: u64 = 0x1_0000;

/// Default selector range for kernel objects the root task creates.
pub const DEFAULT_OBJECT_SELECTORS: (u64, u64) = (0x100, 0x1_0000);

/// Default start of a child's allocatable address space.
pub const DEFAULT_CHILD_VSPACE_BASE: u64 = 0x1000;

/// Default end of a child's allocatable address space.
///
/// Stops short of [`THREAD_EXIT`] so the exit address is never mapped.
pub const DEFAULT_CHILD_VSPACE_END: u64 = THREAD_EXIT & !0xFFFF_FFFF;

/// Number of I/O ports on x86.
pub const IO_PORT_COUNT: u64 = 0x1_0000;

/// Default number of global system interrupts.
pub const DEFAULT_GSI_COUNT: u32 = 256;

/// Static configuration of the child manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Number of domain slots.
    pub max_domains: u32,
    /// Number of logical CPUs in the system.
    pub cpu_count: u16,
    /// CPUs the root task serves; every domain gets a portal bank on each.
    pub cpus: CpuSet,
    /// First selector of the portal area.
    pub portal_base: CapSel,
    /// Selectors `[start, end)` for other kernel objects.
    pub object_selectors: (CapSel, CapSel),
    /// Allocatable virtual range of each child, `[start, end)`.
    pub child_vspace: (u64, u64),
    /// I/O ports that may be granted, `[start, end)`.
    pub io_ports: (u64, u64),
    /// Number of global system interrupts.
    pub gsi_count: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_domains: DEFAULT_MAX_DOMAINS,
            cpu_count: 1,
            cpus: CpuSet::first(1),
            portal_base: CapSel::new(DEFAULT_PORTAL_BASE),
            object_selectors: (
                CapSel::new(DEFAULT_OBJECT_SELECTORS.0),
                CapSel::new(DEFAULT_OBJECT_SELECTORS.1),
            ),
            child_vspace: (DEFAULT_CHILD_VSPACE_BASE, DEFAULT_CHILD_VSPACE_END),
            io_ports: (0, IO_PORT_COUNT),
            gsi_count: DEFAULT_GSI_COUNT,
        }
    }
}

impl ManagerConfig {
    /// Sets the CPU count and serves all of them.
    #[must_use]
    pub const fn with_cpus(mut self, count: u16) -> Self {
        self.cpu_count = count;
        self.cpus = CpuSet::first(count);
        self
    }

    /// Restricts the CPUs the root task serves.
    #[must_use]
    pub const fn with_enabled(mut self, cpus: CpuSet) -> Self {
        self.cpus = cpus;
        self
    }

    /// Sets the number of domain slots.
    #[must_use]
    pub const fn with_max_domains(mut self, max: u32) -> Self {
        self.max_domains = max;
        self
    }

    /// Moves the portal area.
    #[must_use]
    pub const fn with_portal_base(mut self, base: CapSel) -> Self {
        self.portal_base = base;
        self
    }

    /// Sets the object selector range.
    #[must_use]
    pub const fn with_object_selectors(mut self, start: CapSel, end: CapSel) -> Self {
        self.object_selectors = (start, end);
        self
    }

    /// Sets the allocatable virtual range of each child.
    #[must_use]
    pub const fn with_child_vspace(mut self, start: u64, end: u64) -> Self {
        self.child_vspace = (start, end);
        self
    }

    /// Sets the grantable I/O port range.
    #[must_use]
    pub const fn with_io_ports(mut self, start: u64, end: u64) -> Self {
        self.io_ports = (start, end);
        self
    }

    /// Sets the number of global system interrupts.
    #[must_use]
    pub const fn with_gsis(mut self, count: u32) -> Self {
        self.gsi_count = count;
        self
    }

    /// Checks the configuration and computes the portal layout.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgs`] if a range is empty or inverted, no CPU is
    /// enabled, an enabled CPU is beyond `cpu_count`, or the portal area
    /// overlaps the object selectors.
    pub fn validate(&self) -> Result<SelectorLayout, Error> {
        let layout = SelectorLayout::new(self.portal_base, self.cpu_count, self.max_domains)
            .ok_or(Error::InvalidArgs)?;
        if self.max_domains == 0
            || self.cpus.is_empty()
            || !self.cpus.is_subset(CpuSet::first(self.cpu_count))
        {
            return Err(Error::InvalidArgs);
        }

        let obj_start = self.object_selectors.0.as_u64();
        let obj_end = self.object_selectors.1.as_u64();
        let pt_start = layout.base().as_u64();
        let pt_end = pt_start + layout.size();
        if obj_start >= obj_end || obj_start == 0 || (obj_start < pt_end && pt_start < obj_end) {
            return Err(Error::InvalidArgs);
        }

        let (vs_start, vs_end) = self.child_vspace;
        if vs_start >= vs_end || vs_start % PAGE_SIZE != 0 || vs_end % PAGE_SIZE != 0 {
            return Err(Error::InvalidArgs);
        }
        if self.io_ports.0 > self.io_ports.1 {
            return Err(Error::InvalidArgs);
        }
        Ok(layout)
    }
}

// =============================================================================
// Child Configuration
// =============================================================================

/// Per-domain options parsed from a boot module command line.
///
/// The first token is the program path; its last component names the
/// domain. Recognised options:
///
/// | Token | Meaning |
/// |-------|---------|
/// | `cpu=N` | pin the domain's first context to CPU `N` |
/// | `maxmem=SIZE` | cap mapped memory, with optional `K`, `M` or `G` suffix |
/// | `provides=NAME` | name of the service the domain is expected to register |
/// | `lastmod` | stop starting boot modules after this one |
///
/// All other tokens are passed through as program arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildConfig {
    /// Full command line.
    pub cmdline: String,
    /// Domain name.
    pub name: String,
    /// Pinned CPU, if any.
    pub cpu: Option<CpuId>,
    /// Upper bound on mapped memory in bytes.
    pub max_mem: Option<u64>,
    /// Service the domain provides.
    pub provides: Option<String>,
    /// Last boot module to start.
    pub last: bool,
    /// Remaining arguments.
    pub args: Vec<String>,
}

impl ChildConfig {
    /// Parses a command line.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgs`] for an empty command line or a malformed
    /// option value.
    pub fn parse(cmdline: &str) -> Result<Self, Error> {
        let mut tokens = cmdline.split_whitespace();
        let program = tokens.next().ok_or(Error::InvalidArgs)?;
        let name = program
            .rsplit('/')
            .find(|part| !part.is_empty())
            .ok_or(Error::InvalidArgs)?;

        let mut config = Self {
            cmdline: cmdline.to_string(),
            name: name.to_string(),
            cpu: None,
            max_mem: None,
            provides: None,
            last: false,
            args: Vec::new(),
        };

        for token in tokens {
            if let Some(value) = token.strip_prefix("cpu=") {
                let id = value.parse::<u16>().map_err(|_| Error::InvalidArgs)?;
                config.cpu = Some(CpuId::new(id).ok_or(Error::InvalidArgs)?);
            } else if let Some(value) = token.strip_prefix("maxmem=") {
                config.max_mem = Some(parse_size(value)?);
            } else if let Some(value) = token.strip_prefix("provides=") {
                if value.is_empty() {
                    return Err(Error::InvalidArgs);
                }
                config.provides = Some(value.to_string());
            } else if token == "lastmod" {
                config.last = true;
            } else {
                config.args.push(token.to_string());
            }
        }
        Ok(config)
    }
}

/// Parses a byte count with an optional binary suffix.
fn parse_size(value: &str) -> Result<u64, Error> {
    let (digits, shift) = match value.as_bytes().last() {
        Some(b'k' | b'K') => (&value[..value.len() - 1], 10),
        Some(b'm' | b'M') => (&value[..value.len() - 1], 20),
        Some(b'g' | b'G') => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };
    let base = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        digits.parse::<u64>()
    }
    .map_err(|_| Error::InvalidArgs)?;
    base.checked_mul(1 << shift).ok_or(Error::InvalidArgs)
}
