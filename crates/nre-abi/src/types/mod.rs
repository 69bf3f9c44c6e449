// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Core type definitions for selectors, CPUs, domains and sessions.
//!
//! These newtypes prevent accidentally mixing different ID types at compile time.

mod cap;
mod id;


pub use cap::CapSel;
pub use id::{CpuId, DomainId, SessionId};
