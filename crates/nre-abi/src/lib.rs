// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared ABI definitions between the NRE root task and its child domains.
//!
//! This crate defines the contract every party of a portal call agrees on:
//! - Identifier newtypes for selectors, CPUs, domains and sessions
//! - The CPU availability bitset carried by service registrations
//! - The portal selector layout (per-domain stride arithmetic)
//! - The portal call wire format and result codes
//! - Fault information delivered to the page-fault portal
//!
//! # Design Principles
//!
//! - **No dependencies**: Pure data types, 100% host-testable
//! - **One formula**: Every component that maps a selector back to a
//!   (domain, CPU) pair goes through [`layout::SelectorLayout`]
//! - **64-bit only**: NRE targets 64-bit platforms exclusively
//!
//! # Modules
//!
//! - [`types`]: Core ID types (`CapSel`, `CpuId`, `DomainId`, `SessionId`)
//! - [`cpuset`]: CPU availability bitset
//! - [`layout`]: Portal kinds and selector arithmetic
//! - [`ipc`]: Command tags, result codes and the message frame
//! - [`fault`]: Page-fault information

#![no_std]

pub mod cpuset;
pub mod fault;
pub mod ipc;
pub mod layout;
pub mod types;

// Re-export commonly used types at crate root
pub use cpuset::CpuSet;
pub use fault::{FAULT_EXEC, FAULT_WRITE, FaultInfo, THREAD_EXIT};
pub use ipc::{FrameError, FrameReader, ResultCode, ServiceCommand, TypedItem, UtcbFrame, Word};
pub use layout::{PAGE_SIZE, PORTALS_PER_CPU, PortalAddr, PortalKind, SelectorLayout};
pub use types::{CapSel, CpuId, DomainId, SessionId};
