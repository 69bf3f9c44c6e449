// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Boot sequence: start the boot modules as child domains.
//!
//! The first boot module is the root task itself and is skipped. Every
//! other module is loaded on the CPU its command line pins it to, or on the
//! next CPU in round-robin order. Loading stops after a module marked
//! `lastmod`. Before any module starts, the services every child relies on
//! must be registered.

#[cfg(test)]
mod boot_test;

use alloc::string::String;
use alloc::vec::Vec;

use nre_abi::{CpuId, CpuSet};
use tracing::{error, info};

use crate::Error;
use crate::child::{ChildConfig, ChildManager, DomainHandle};

/// Services that must exist before the first child starts.
pub const REQUIRED_SERVICES: [&str; 2] = ["log", "sysinfo"];

/// A module handed over by the boot loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootModule<'a> {
    /// Address of the module image.
    pub base: u64,
    /// Size of the module image.
    pub size: u64,
    /// Module command line.
    pub cmdline: &'a str,
}

/// Result of starting one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootOutcome {
    /// Command line of the module.
    pub cmdline: String,
    /// Handle of the new domain, or why it failed.
    pub result: Result<DomainHandle, Error>,
}

/// Endless round-robin over a CPU set.
#[derive(Clone, Debug)]
pub struct CpuCycler {
    cpus: CpuSet,
    last: Option<CpuId>,
}

impl CpuCycler {
    /// Creates a cycler starting at the lowest CPU of `cpus`.
    #[must_use]
    pub const fn new(cpus: CpuSet) -> Self {
        Self { cpus, last: None }
    }
}

impl Iterator for CpuCycler {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        let after = self.last.map_or(0, |cpu| cpu.as_u16() + 1);
        let next = self
            .cpus
            .iter()
            .find(|cpu| cpu.as_u16() >= after)
            .or_else(|| self.cpus.iter().next())?;
        self.last = Some(next);
        Some(next)
    }
}

/// Starts the boot modules.
///
/// Waits up to `max_spins` registry polls for [`REQUIRED_SERVICES`]. A
/// module that fails to load is logged and skipped.
///
/// # Errors
///
/// [`Error::NotFound`] if a required service never appeared; no module is
/// started in that case.
pub fn start_children(
    manager: &ChildManager,
    modules: &[BootModule<'_>],
    max_spins: usize,
) -> Result<Vec<BootOutcome>, Error> {
    manager.wait_for_services(&REQUIRED_SERVICES, max_spins)?;

    let mut cpus = CpuCycler::new(manager.config().cpus);
    let mut outcomes = Vec::new();
    for module in modules.iter().skip(1) {
        let result = ChildConfig::parse(module.cmdline).and_then(|config| {
            let last = config.last;
            let cpu = match config.cpu {
                Some(cpu) => cpu,
                None => cpus.next().ok_or(Error::InvalidArgs)?,
            };
            let handle = manager.load_on(module.base, module.size, config, cpu)?;
            Ok((handle, last))
        });

        let last = match result {
            Ok((handle, last)) => {
                outcomes.push(BootOutcome {
                    cmdline: String::from(module.cmdline),
                    result: Ok(handle),
                });
                last
            }
            Err(err) => {
                error!(cmdline = module.cmdline, %err, "boot module failed to start");
                outcomes.push(BootOutcome {
                    cmdline: String::from(module.cmdline),
                    result: Err(err),
                });
                ChildConfig::parse(module.cmdline).is_ok_and(|config| config.last)
            }
        };
        if last {
            break;
        }
    }
    info!(
        started = outcomes.iter().filter(|o| o.result.is_ok()).count(),
        failed = outcomes.iter().filter(|o| o.result.is_err()).count(),
        "boot modules processed"
    );
    Ok(outcomes)
}
