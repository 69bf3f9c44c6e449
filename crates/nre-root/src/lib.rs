// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! # NRE Root Task
//!
//! User-level process and IPC substrate of a capability microkernel.
//!
//! This crate is the trusted computing base above the kernel. It:
//! - Loads boot modules as child protection domains
//! - Answers the portals every child uses for startup, faults and resources
//! - Keeps the system-wide registry of named services
//! - Brokers client sessions with registered services
//!
//! Everything that touches the kernel goes through [`platform::Kernel`], so
//! the whole crate runs on the host against [`platform::MockKernel`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod boot;
pub mod child;
pub mod client;
mod error;
pub mod image;
pub mod platform;
pub mod region;
pub mod registry;
pub mod session;
pub mod slots;

pub use child::{ChildManager, DomainHandle, DomainInfo, DomainObserver, DomainState};
pub use error::Error;
pub use region::RegionAllocator;
pub use registry::ServiceRegistry;

/// Crate version.
pub const VERSION: &str = match option_env!("NRE_VERSION") {
    Some(v) => v,
    None => "unknown",
};
