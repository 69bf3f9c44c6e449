// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Kernel interface traits.

use alloc::sync::Arc;
use core::fmt;

use nre_abi::{CapSel, CpuId, UtcbFrame};

/// Selector of the root task's own protection domain.
pub const ROOT_PD: CapSel = CapSel::new(1);

/// Identity of an invoked portal as seen by its handler.
///
/// The badge is chosen when the portal is created and cannot be forged by
/// the caller. The child manager stores the owning slot's generation in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortalId {
    /// Selector the portal was created at.
    pub sel: CapSel,
    /// Badge attached at creation.
    pub badge: u64,
}

/// Handler behind a portal.
///
/// The kernel runs `call` on the execution context the portal is bound to.
/// The handler consumes the request in `frame` and leaves the reply in it.
/// Handlers run concurrently on different CPUs.
pub trait Portal: Send + Sync {
    /// Handles one call.
    fn call(&self, id: PortalId, frame: &mut UtcbFrame);
}

/// Error from a kernel operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Selector does not name an object of the required type.
    InvalidCapability,
    /// Destination selector is already occupied.
    SelectorInUse,
    /// Kernel memory or another kernel resource is exhausted.
    OutOfResources,
    /// Argument rejected by the kernel.
    InvalidArgument,
    /// A peer reported a kernel failure in its reply.
    Remote,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapability => write!(f, "invalid capability"),
            Self::SelectorInUse => write!(f, "selector in use"),
            Self::OutOfResources => write!(f, "out of kernel resources"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Remote => write!(f, "remote kernel error"),
        }
    }
}

impl core::error::Error for KernelError {}

/// Kernel operations used by the root task.
///
/// All selectors are in the root task's capability space.
pub trait Kernel: Send + Sync {
    /// Creates a protection domain.
    fn create_pd(&self, sel: CapSel, name: &str) -> Result<(), KernelError>;

    /// Creates an execution context in `pd` on `cpu`.
    ///
    /// Exceptions of the context are delivered to the portals starting at
    /// `event_base`, laid out like one CPU's bank of
    /// [`nre_abi::PortalKind`].
    fn create_ec(
        &self,
        sel: CapSel,
        pd: CapSel,
        cpu: CpuId,
        event_base: CapSel,
    ) -> Result<(), KernelError>;

    /// Creates a portal bound to the local context `ec`.
    fn create_pt(
        &self,
        sel: CapSel,
        ec: CapSel,
        badge: u64,
        handler: Arc<dyn Portal>,
    ) -> Result<(), KernelError>;

    /// Creates a semaphore with an initial count.
    fn create_sm(&self, sel: CapSel, count: u64) -> Result<(), KernelError>;

    /// Gives `ec` a scheduling context and lets it run from `ip`.
    fn start(&self, ec: CapSel, ip: u64) -> Result<(), KernelError>;

    /// Grants the I/O ports `[base, base + count)` to `pd`.
    fn assign_io(&self, pd: CapSel, base: u64, count: u64) -> Result<(), KernelError>;

    /// Routes the global system interrupt `gsi` to `pd`.
    fn assign_gsi(&self, pd: CapSel, gsi: u32) -> Result<(), KernelError>;

    /// Revokes and deletes `count` selectors starting at `sel`.
    ///
    /// Empty selectors in the range are skipped.
    fn revoke(&self, sel: CapSel, count: u64);

    /// Calls the portal at `sel` and waits for the reply.
    fn call(&self, sel: CapSel, frame: &mut UtcbFrame) -> Result<(), KernelError>;
}
