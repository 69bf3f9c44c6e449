// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Fault information structures.
//!
//! When an execution context of a child domain faults, the kernel delivers
//! the fault as a call on the domain's page-fault portal. This module
//! defines how the fault is represented in the message frame.

use crate::ipc::{FrameError, FrameReader, UtcbFrame};

/// Instruction pointer a thread jumps to when its entry function returns.
///
/// The page is never mapped, so a returning thread raises a page fault at
/// exactly this address. The root task treats such a fault as a regular
/// thread exit rather than a crash.
pub const THREAD_EXIT: u64 = 0x0000_7FFF_FFFF_F000;

/// Fault error code bit: the access was a write.
pub const FAULT_WRITE: u64 = 1 << 1;

/// Fault error code bit: the access was an instruction fetch.
pub const FAULT_EXEC: u64 = 1 << 4;

/// Page fault delivered to the root task.
///
/// Message format (after the portal is selected, no command tag):
/// - word 0: faulting address
/// - word 1: instruction pointer
/// - word 2: architecture error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInfo {
    /// Faulting virtual address.
    pub addr: u64,
    /// Instruction pointer at the time of the fault.
    pub ip: u64,
    /// Error code.
    pub error: u64,
}

impl FaultInfo {
    /// Creates the fault a thread raises when returning from its entry.
    #[must_use]
    pub const fn thread_exit() -> Self {
        Self {
            addr: THREAD_EXIT,
            ip: THREAD_EXIT,
            error: FAULT_EXEC,
        }
    }

    /// Returns true if this fault signals a regular thread exit.
    #[inline]
    #[must_use]
    pub const fn is_thread_exit(&self) -> bool {
        self.ip == THREAD_EXIT
    }

    /// Returns true if the faulting access was a write.
    #[inline]
    #[must_use]
    pub const fn is_write(&self) -> bool {
        self.error & FAULT_WRITE != 0
    }

    /// Encodes the fault into a frame.
    pub fn write_to(&self, frame: &mut UtcbFrame) -> Result<(), FrameError> {
        frame.push_u64(self.addr)?;
        frame.push_u64(self.ip)?;
        frame.push_u64(self.error)
    }

    /// Decodes a fault from a frame.
    pub fn read_from(input: &mut FrameReader<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            addr: input.pop_u64()?,
            ip: input.pop_u64()?,
            error: input.pop_u64()?,
        })
    }
}
