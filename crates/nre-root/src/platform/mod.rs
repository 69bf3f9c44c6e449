// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Platform abstraction for the root task.
//!
//! The root task only needs a handful of kernel operations: create
//! protection domains, execution contexts, portals and semaphores, start
//! contexts, grant hardware resources, revoke selectors and call portals.
//! They are collected in the [`Kernel`] trait so the manager logic can be
//! tested on the host against [`MockKernel`].


// Mock requires std, only available with std or test
#[cfg(any(test, feature = "std"))]
mod mock;
mod traits;

#[cfg(any(test, feature = "std"))]
pub use mock::{MockKernel, ObjectKind};
pub use traits::{Kernel, KernelError, Portal, PortalId, ROOT_PD};
