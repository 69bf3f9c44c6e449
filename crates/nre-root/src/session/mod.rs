// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Session protocol, service side.
//!
//! A [`Service`] owns a selector area laid out in rows of one selector per
//! system CPU:
//!
//! | Row | Content |
//! |-----|---------|
//! | 0 | handler contexts |
//! | 1 | control portals (registered under the service name) |
//! | 2 + id | portals of session `id` |
//!
//! Clients reach the control portal only through the root task, which adds
//! their domain handle to `OpenSession` and `CloseSession`. The portals of
//! a session are handed to the client and called directly; the session and
//! CPU of such a call follow from the selector.


use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use nre_abi::{CapSel, CpuId, CpuSet, ResultCode, ServiceCommand, SessionId, UtcbFrame};
use spin::Mutex;
use tracing::{debug, info, warn};

use crate::Error;
use crate::child::{DomainHandle, DomainObserver};
use crate::client::RootPortals;
use crate::platform::{Kernel, Portal, PortalId};

/// Rows before the first session row.
const RESERVED_ROWS: u64 = 2;

/// Service-specific behaviour behind the session protocol.
pub trait SessionHandler: Send + Sync + 'static {
    /// Per-session state.
    type Session: Send + Sync + 'static;

    /// Creates the state of a new session.
    fn create_session(
        &self,
        id: SessionId,
        client: DomainHandle,
        args: &str,
    ) -> Result<Self::Session, Error>;

    /// Handles a call on a session portal and writes the reply.
    fn handle(
        &self,
        session: &Session<Self::Session>,
        cpu: CpuId,
        frame: &mut UtcbFrame,
    ) -> Result<(), Error>;

    /// Tears a session down. Runs exactly once per session.
    fn destroy_session(&self, _session: &Session<Self::Session>) {}
}

/// An open session.
#[derive(Debug)]
pub struct Session<S> {
    id: SessionId,
    client: DomainHandle,
    caps: CapSel,
    data: S,
}

impl<S> Session<S> {
    /// Returns the session identity.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the client domain.
    pub const fn client(&self) -> DomainHandle {
        self.client
    }

    /// Returns the first portal selector of the session.
    pub const fn caps(&self) -> CapSel {
        self.caps
    }

    /// Returns the service-specific state.
    pub const fn data(&self) -> &S {
        &self.data
    }
}

/// What a service does when its last session closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopPolicy {
    /// Keep running until [`Service::stop`].
    Explicit,
    /// Stop as soon as no session is open.
    WhenIdle,
}

/// Static parameters of a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Registered name.
    pub name: String,
    /// CPUs the service handles calls on.
    pub cpus: CpuSet,
    /// Number of CPUs in the system; the row width of the selector area.
    pub cpu_count: u16,
    /// First selector of the service's area.
    pub base: CapSel,
    /// Number of session rows.
    pub max_sessions: u32,
    /// Protection domain the handler contexts live in.
    pub pd: CapSel,
    /// Behaviour on last session close.
    pub stop: StopPolicy,
}

impl ServiceConfig {
    /// Returns the number of selectors the area needs.
    #[must_use]
    pub fn area_size(&self) -> u64 {
        (u64::from(self.max_sessions) + RESERVED_ROWS) * u64::from(self.cpu_count)
    }
}

/// A session row. Only `Free` rows may be handed out; a row stays taken
/// until its portals are revoked.
enum Slot<S> {
    Free,
    Opening,
    Open(Arc<Session<S>>),
    Closing,
}

/// A service accepting sessions.
pub struct Service<H: SessionHandler> {
    config: ServiceConfig,
    kernel: Arc<dyn Kernel>,
    handler: H,
    sessions: Mutex<Vec<Slot<H::Session>>>,
    stopped: AtomicBool,
    started: AtomicBool,
    /// Root portal bank the service registered through.
    registration: Mutex<Option<CapSel>>,
    this: Weak<Self>,
}

impl<H: SessionHandler> Service<H> {
    /// Creates a service. Nothing is visible to the kernel until
    /// [`Self::start`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgs`] if the CPU set is empty or not within
    /// `cpu_count`, or if the selector area does not fit.
    pub fn new(
        kernel: Arc<dyn Kernel>,
        config: ServiceConfig,
        handler: H,
    ) -> Result<Arc<Self>, Error> {
        if config.cpus.is_empty()
            || config.cpu_count == 0
            || !config.cpus.is_subset(CpuSet::first(config.cpu_count))
            || config.base.offset(config.area_size()).is_none()
        {
            return Err(Error::InvalidArgs);
        }
        let max_sessions = config.max_sessions as usize;
        Ok(Arc::new_cyclic(|this| Self {
            config,
            kernel,
            handler,
            sessions: Mutex::new((0..max_sessions).map(|_| Slot::Free).collect()),
            stopped: AtomicBool::new(false),
            started: AtomicBool::new(false),
            registration: Mutex::new(None),
            this: this.clone(),
        }))
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the CPUs the service runs on.
    #[must_use]
    pub const fn cpus(&self) -> CpuSet {
        self.config.cpus
    }

    /// Returns the service-specific handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    fn row(&self, row: u64) -> CapSel {
        CapSel::new(self.config.base.as_u64() + row * u64::from(self.config.cpu_count))
    }

    fn at(row: CapSel, cpu: CpuId) -> CapSel {
        CapSel::new(row.as_u64() + u64::from(cpu.as_u16()))
    }

    /// Returns the first control portal; this is what gets registered.
    #[must_use]
    pub fn portal(&self) -> CapSel {
        self.row(1)
    }

    /// Returns the first session portal of session 0.
    ///
    /// Session `id` starts at `caps() + id * cpu_count`.
    #[must_use]
    pub fn caps(&self) -> CapSel {
        self.row(RESERVED_ROWS)
    }

    /// Returns the first portal selector of a session.
    #[must_use]
    pub fn session_caps(&self, id: SessionId) -> CapSel {
        self.row(RESERVED_ROWS + u64::from(id.as_u32()))
    }

    /// Creates the handler contexts and control portals.
    ///
    /// Returns the control portal base to register with the root task.
    pub fn start(&self) -> Result<CapSel, Error> {
        let me = self.this.upgrade().ok_or(Error::NotFound)?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgs);
        }
        for cpu in self.config.cpus {
            let ec = Self::at(self.row(0), cpu);
            self.kernel.create_ec(ec, self.config.pd, cpu, CapSel::NULL)?;
            self.kernel.create_pt(Self::at(self.portal(), cpu), ec, 0, me.clone())?;
        }
        info!(service = %self.config.name, portal = %self.portal(), "service started");
        Ok(self.portal())
    }

    /// Registers the service under its name through the root portal bank
    /// `bank` of the calling domain and returns the binding selector.
    ///
    /// A service registered this way withdraws its name when it stops.
    pub fn register(&self, bank: CapSel) -> Result<CapSel, Error> {
        let binding = RootPortals::new(&*self.kernel, bank).register(
            &self.config.name,
            self.config.cpus,
            self.portal(),
        )?;
        *self.registration.lock() = Some(bank);
        Ok(binding)
    }

    /// Returns true once the service stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolves a session portal selector to its session and CPU.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] after the service stopped, for selectors outside
    /// the session rows and for unused CPU columns.
    pub fn resolve(&self, sel: CapSel) -> Result<(SessionId, CpuId), Error> {
        if self.is_stopped() {
            return Err(Error::NotFound);
        }
        let off = sel.distance_from(self.caps()).ok_or(Error::NotFound)?;
        let width = u64::from(self.config.cpu_count);
        let id = u32::try_from(off / width).map_err(|_| Error::NotFound)?;
        if id >= self.config.max_sessions {
            return Err(Error::NotFound);
        }
        let cpu = u16::try_from(off % width)
            .ok()
            .and_then(CpuId::new)
            .filter(|cpu| self.config.cpus.contains(*cpu))
            .ok_or(Error::NotFound)?;
        Ok((SessionId::new(id), cpu))
    }

    /// Returns an open session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Arc<Session<H::Session>>> {
        match self.sessions.lock().get(id.as_usize()) {
            Some(Slot::Open(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Returns the identities of all open sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions
            .lock()
            .iter()
            .filter_map(|slot| match slot {
                Slot::Open(session) => Some(session.id),
                _ => None,
            })
            .collect()
    }

    /// Opens a session for `client`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the service stopped
    /// - [`Error::CapacityExceeded`] if every session row is taken
    /// - whatever the create hook or the kernel reports
    pub fn open_session(
        &self,
        client: DomainHandle,
        args: &str,
    ) -> Result<(SessionId, CapSel), Error> {
        if self.is_stopped() {
            return Err(Error::NotFound);
        }
        let me = self.this.upgrade().ok_or(Error::NotFound)?;
        let id = {
            let mut sessions = self.sessions.lock();
            let index = sessions
                .iter()
                .position(|slot| matches!(slot, Slot::Free))
                .ok_or(Error::CapacityExceeded)?;
            sessions[index] = Slot::Opening;
            SessionId::new(u32::try_from(index).map_err(|_| Error::CapacityExceeded)?)
        };

        match self.build_session(&me, id, client, args) {
            Ok(session) => {
                let caps = session.caps;
                {
                    let mut sessions = self.sessions.lock();
                    if !self.is_stopped() {
                        sessions[id.as_usize()] = Slot::Open(session);
                        debug!(service = %self.config.name, session = %id, %client, "session open");
                        return Ok((id, caps));
                    }
                }
                // Stopped while the session was built; the row stays
                // `Opening` until the portals are gone
                self.teardown(&session);
                self.sessions.lock()[id.as_usize()] = Slot::Free;
                Err(Error::NotFound)
            }
            Err(err) => {
                // build_session revoked whatever it created
                self.sessions.lock()[id.as_usize()] = Slot::Free;
                Err(err)
            }
        }
    }

    fn build_session(
        &self,
        me: &Arc<Self>,
        id: SessionId,
        client: DomainHandle,
        args: &str,
    ) -> Result<Arc<Session<H::Session>>, Error> {
        let data = self.handler.create_session(id, client, args)?;
        let caps = self.session_caps(id);
        for cpu in self.config.cpus {
            let ec = Self::at(self.row(0), cpu);
            let created = self.kernel.create_pt(
                Self::at(caps, cpu),
                ec,
                u64::from(id.as_u32()),
                Arc::clone(me) as Arc<dyn Portal>,
            );
            if let Err(err) = created {
                let session = Session {
                    id,
                    client,
                    caps,
                    data,
                };
                self.teardown(&session);
                return Err(err.into());
            }
        }
        Ok(Arc::new(Session {
            id,
            client,
            caps,
            data,
        }))
    }

    /// Revokes a session's portals and runs the destroy hook.
    fn teardown(&self, session: &Session<H::Session>) {
        self.kernel
            .revoke(session.caps, u64::from(self.config.cpu_count));
        self.handler.destroy_session(session);
    }

    /// Closes a session of `client`.
    ///
    /// Closing a session that is not open for `client` is a no-op.
    pub fn close_session(&self, id: SessionId, client: DomainHandle) {
        let session = {
            let mut sessions = self.sessions.lock();
            let Some(slot) = sessions.get_mut(id.as_usize()) else {
                return;
            };
            match slot {
                Slot::Open(session) if session.client == client => {}
                Slot::Open(_) => {
                    warn!(
                        service = %self.config.name,
                        session = %id,
                        %client,
                        "close of foreign session ignored"
                    );
                    return;
                }
                _ => return,
            }
            let Slot::Open(session) = core::mem::replace(slot, Slot::Closing) else {
                return;
            };
            session
        };
        self.teardown(&session);
        let idle = {
            let mut sessions = self.sessions.lock();
            sessions[id.as_usize()] = Slot::Free;
            sessions.iter().all(|slot| matches!(slot, Slot::Free))
        };
        debug!(service = %self.config.name, session = %id, %client, "session closed");
        if idle && self.config.stop == StopPolicy::WhenIdle {
            self.stop();
        }
    }

    /// Closes every session of `client`.
    pub fn close_client(&self, client: DomainHandle) {
        let ids: Vec<SessionId> = self
            .sessions
            .lock()
            .iter()
            .filter_map(|slot| match slot {
                Slot::Open(session) if session.client == client => Some(session.id),
                _ => None,
            })
            .collect();
        for id in ids {
            self.close_session(id, client);
        }
    }

    /// Stops the service: withdraws its name, revokes all portals and
    /// destroys all sessions.
    ///
    /// Calling it again is a no-op.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.withdraw();
        let open: Vec<Arc<Session<H::Session>>> = {
            let mut sessions = self.sessions.lock();
            sessions
                .iter_mut()
                .filter_map(|slot| {
                    if !matches!(slot, Slot::Open(_)) {
                        // Openers and closers finish their own rows
                        return None;
                    }
                    match core::mem::replace(slot, Slot::Closing) {
                        Slot::Open(session) => Some(session),
                        _ => None,
                    }
                })
                .collect()
        };
        self.kernel
            .revoke(self.portal(), u64::from(self.config.cpu_count));
        for session in &open {
            self.teardown(session);
        }
        {
            let mut sessions = self.sessions.lock();
            for session in &open {
                sessions[session.id.as_usize()] = Slot::Free;
            }
        }
        info!(service = %self.config.name, closed = open.len(), "service stopped");
    }

    /// Removes the registry entry made by [`Self::register`].
    fn withdraw(&self) {
        let Some(bank) = self.registration.lock().take() else {
            return;
        };
        match RootPortals::new(&*self.kernel, bank).unregister(&self.config.name) {
            Ok(()) => debug!(service = %self.config.name, "service unregistered"),
            // The owning domain is already gone and took the entry along
            Err(Error::NotFound) => {}
            Err(err) => warn!(service = %self.config.name, %err, "failed to unregister service"),
        }
    }

    fn control(&self, frame: &mut UtcbFrame) -> Result<(), Error> {
        let mut input = frame.reader();
        match input.pop::<ServiceCommand>()? {
            ServiceCommand::OpenSession => {
                let args = String::from(input.pop_str()?);
                let client: DomainHandle = input.pop()?;
                let (id, caps) = self.open_session(client, &args)?;
                frame.reply(ResultCode::Success);
                frame.push(id)?;
                frame.delegate(caps)?;
            }
            ServiceCommand::CloseSession => {
                let id: SessionId = input.pop()?;
                let client: DomainHandle = input.pop()?;
                self.close_session(id, client);
                frame.reply(ResultCode::Success);
            }
            ServiceCommand::Register | ServiceCommand::Unregister => {
                return Err(Error::InvalidArgs);
            }
        }
        Ok(())
    }

    fn dispatch(&self, id: PortalId, frame: &mut UtcbFrame) -> Result<(), Error> {
        if self.is_stopped() {
            return Err(Error::NotFound);
        }
        let sel = id.sel.as_u64();
        if sel >= self.portal().as_u64() && sel < self.caps().as_u64() {
            return self.control(frame);
        }
        let (session_id, cpu) = self.resolve(id.sel)?;
        if u64::from(session_id.as_u32()) != id.badge {
            return Err(Error::NotFound);
        }
        let session = self.session(session_id).ok_or(Error::NotFound)?;
        self.handler.handle(&session, cpu, frame)
    }
}

impl<H: SessionHandler> Portal for Service<H> {
    fn call(&self, id: PortalId, frame: &mut UtcbFrame) {
        if let Err(err) = self.dispatch(id, frame) {
            frame.reply(err.code());
        }
    }
}

impl<H: SessionHandler> DomainObserver for Service<H> {
    fn domain_destroyed(&self, domain: DomainHandle) {
        self.close_client(domain);
    }
}
