// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Shared infrastructure for the integration tests.
//!
//! Provides a [`TestSystem`] of mock kernel, mock loader and child manager,
//! and a [`LogHandler`] service that records what its clients write.
//!
//! This module is not a test file, so it follows the full clippy rules.

#![allow(dead_code, reason = "not every test file uses every helper")]

use std::sync::Arc;

use nre_abi::{CapSel, CpuId, CpuSet, PortalKind, SessionId, UtcbFrame};
use nre_root::child::{ChildManager, DomainHandle, ManagerConfig};
use nre_root::client::RootPortals;
use nre_root::image::MockLoader;
use nre_root::platform::{MockKernel, ROOT_PD};
use nre_root::session::{Service, ServiceConfig, Session, SessionHandler, StopPolicy};
use nre_root::Error;
use spin::Mutex;
use tracing_subscriber::EnvFilter;

/// Entry point of every test image.
pub const ENTRY: u64 = 0x40_1000;

/// Selector area of the root task's log service.
pub const LOG_BASE: CapSel = CapSel::new(0x8_0000);

/// Installs a test subscriber once; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Boot module address of test image `n`.
#[must_use]
pub const fn image(n: u64) -> u64 {
    0x100_0000 + n * 0x10_0000
}

/// Kernel, loader and manager wired together.
pub struct TestSystem {
    pub kernel: Arc<MockKernel>,
    pub manager: Arc<ChildManager>,
}

impl TestSystem {
    /// Creates a system that knows `images` loadable images.
    pub fn new(config: ManagerConfig, images: u64) -> Result<Self, Error> {
        init_tracing();
        let kernel = Arc::new(MockKernel::new());
        let loader = Arc::new(MockLoader::new());
        for n in 0..images {
            loader.add(image(n), ENTRY);
        }
        let manager = ChildManager::new(config, kernel.clone(), loader)?;
        Ok(Self { kernel, manager })
    }

    /// Loads test image `n`.
    pub fn load(&self, n: u64, cmdline: &str) -> Result<DomainHandle, Error> {
        self.manager.load(image(n), 0x1000, cmdline)
    }

    /// Returns the root portals of `domain` on `cpu`.
    pub fn bank(&self, domain: DomainHandle, cpu: CpuId) -> Result<RootPortals<'_>, Error> {
        let sel = self.manager.portal(domain, cpu, PortalKind::Startup)?;
        Ok(RootPortals::new(&*self.kernel, sel))
    }

    /// Starts a log service in the root task and registers it.
    pub fn start_log(&self) -> Result<Arc<Service<LogHandler>>, Error> {
        let cpus = self.manager.config().cpus;
        let config = ServiceConfig {
            name: String::from("log"),
            cpus,
            cpu_count: self.manager.config().cpu_count,
            base: LOG_BASE,
            max_sessions: 16,
            pd: ROOT_PD,
            stop: StopPolicy::Explicit,
        };
        let service = Service::new(self.kernel.clone(), config, LogHandler::default())?;
        let portal = service.start()?;
        self.manager.register_root_service("log", portal, cpus)?;
        Ok(service)
    }
}

/// Collects lines, prefixed with the name a client gave when opening.
#[derive(Default)]
pub struct LogHandler {
    lines: Mutex<Vec<String>>,
}

impl LogHandler {
    /// Returns everything written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl SessionHandler for LogHandler {
    type Session = String;

    fn create_session(
        &self,
        _id: SessionId,
        _client: DomainHandle,
        args: &str,
    ) -> Result<String, Error> {
        if args.is_empty() {
            return Err(Error::InvalidArgs);
        }
        Ok(String::from(args))
    }

    fn handle(
        &self,
        session: &Session<String>,
        _cpu: CpuId,
        frame: &mut UtcbFrame,
    ) -> Result<(), Error> {
        let line = String::from(frame.reader().pop_str()?);
        self.lines.lock().push(format!("[{}] {line}", session.data()));
        frame.reply(nre_abi::ResultCode::Success);
        Ok(())
    }
}

/// Writes one line through an open log session.
pub fn write_log(
    system: &TestSystem,
    session: &nre_root::client::SessionRef,
    cpu: CpuId,
    line: &str,
) -> Result<(), Error> {
    let mut frame = UtcbFrame::new();
    frame.push_str(line)?;
    nre_root::client::call_session(&*system.kernel, session, cpu, &mut frame)?;
    Ok(())
}

/// A CPU set of the first `count` CPUs.
#[must_use]
pub const fn cpus(count: u16) -> CpuSet {
    CpuSet::first(count)
}
