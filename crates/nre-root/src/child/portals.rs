// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Portal handlers of the child manager.
//!
//! Every handler reads its request from the frame and writes its reply back
//! into it. Failures are turned into a bare result code by
//! [`ChildManager::dispatch`].

use alloc::string::ToString;
use alloc::sync::Weak;

use nre_abi::{
    CpuSet, FaultInfo, PAGE_SIZE, PortalKind, ResultCode, ServiceCommand, SessionId, UtcbFrame,
};
use tracing::{debug, error, info, trace, warn};

use super::domain::DomainState;
use super::{Call, ChildManager};
use crate::Error;
use crate::platform::{Portal, PortalId};

/// Portal handler object shared by all child portals.
pub(super) struct ManagerPortal {
    manager: Weak<ChildManager>,
}

impl ManagerPortal {
    pub(super) const fn new(manager: Weak<ChildManager>) -> Self {
        Self { manager }
    }
}

impl Portal for ManagerPortal {
    fn call(&self, id: PortalId, frame: &mut UtcbFrame) {
        match self.manager.upgrade() {
            Some(manager) => manager.dispatch(id, frame),
            None => frame.reply(ResultCode::NotFound),
        }
    }
}

impl ChildManager {
    /// Handles one call on a child portal.
    pub(super) fn dispatch(&self, id: PortalId, frame: &mut UtcbFrame) {
        let result = self.enter(id.sel, id.badge).and_then(|call| {
            trace!(domain = %call.domain.handle, kind = ?call.kind, cpu = %call.cpu, "portal call");
            match call.kind {
                PortalKind::Startup => self.portal_startup(&call, frame),
                PortalKind::PageFault => self.portal_page_fault(&call, frame),
                PortalKind::Service => self.portal_service(&call, frame),
                PortalKind::Map => self.portal_map(&call, frame),
                PortalKind::Unmap => self.portal_unmap(&call, frame),
                PortalKind::Io => self.portal_io(&call, frame),
                PortalKind::Gsi => self.portal_gsi(&call, frame),
            }
        });
        if let Err(err) = result {
            debug!(sel = %id.sel, %err, "portal call failed");
            frame.reply(err.code());
        }
    }

    /// A context of the domain starts and asks for its entry point.
    fn portal_startup(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        {
            let mut inner = call.domain.inner.lock();
            if !matches!(inner.state, DomainState::Loading | DomainState::Running) {
                return Err(Error::NotFound);
            }
            inner.startups += 1;
            // The first context was counted when the domain was created
            if inner.startups > 1 {
                inner.refs += 1;
            }
            debug!(
                domain = %call.domain.handle,
                contexts = inner.refs,
                "context started"
            );
        }
        frame.reply(ResultCode::Success);
        frame.push(call.domain.entry)?;
        Ok(())
    }

    /// A context faulted or returned from its entry function.
    ///
    /// Either way the context is gone and its reference is dropped.
    fn portal_page_fault(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        let fault = FaultInfo::read_from(&mut frame.reader())?;
        let domain = &call.domain;
        if fault.is_thread_exit() {
            info!(domain = %domain.handle, name = %domain.config.name, "context exited");
        } else {
            error!(
                domain = %domain.handle,
                name = %domain.config.name,
                cpu = %call.cpu,
                addr = fault.addr,
                ip = fault.ip,
                write = fault.is_write(),
                "unresolvable page fault, terminating context"
            );
        }
        frame.reply(ResultCode::Success);
        self.drop_ref(domain);
        Ok(())
    }

    fn portal_service(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        let mut input = frame.reader();
        match input.pop::<ServiceCommand>()? {
            ServiceCommand::Register => {
                let name = input.pop_str()?.to_string();
                let cpus: CpuSet = input.pop()?;
                let portal = input.translated(0)?;

                let inner = call.domain.inner.lock();
                // Registering under the domain lock keeps a dying domain
                // from leaving an entry behind
                if inner.state == DomainState::Dying {
                    return Err(Error::NotFound);
                }
                let binding = self.register_service(call.domain.handle, name, portal, cpus)?;
                drop(inner);

                frame.reply(ResultCode::Success);
                frame.delegate(binding)?;
            }
            ServiceCommand::OpenSession => {
                let name = input.pop_str()?.to_string();
                let args = input.pop_str()?.to_string();
                let record = self.registry.find(&name).ok_or(Error::NotFound)?;
                let target = record.portal_for(call.cpu).ok_or(Error::NotFound)?;

                let mut request = UtcbFrame::new();
                request.push(ServiceCommand::OpenSession)?;
                request.push_str(&args)?;
                request.push(call.domain.handle)?;
                self.forward(target, &mut request)?;

                let mut reply = request.result()?;
                let id: SessionId = reply.pop()?;
                let caps = reply.delegated(0)?;
                debug!(
                    client = %call.domain.handle,
                    service = %name,
                    session = %id,
                    "session opened"
                );

                frame.reply(ResultCode::Success);
                frame.push(id)?;
                frame.delegate(caps)?;
            }
            ServiceCommand::CloseSession => {
                let name = input.pop_str()?.to_string();
                let id: SessionId = input.pop()?;
                let record = self.registry.find(&name).ok_or(Error::NotFound)?;
                let target = record.portal_for(call.cpu).ok_or(Error::NotFound)?;

                let mut request = UtcbFrame::new();
                request.push(ServiceCommand::CloseSession)?;
                request.push(id)?;
                request.push(call.domain.handle)?;
                self.forward(target, &mut request)?;
                request.result()?;

                frame.reply(ResultCode::Success);
            }
            ServiceCommand::Unregister => {
                let name = input.pop_str()?.to_string();
                self.unregister_service(&name, call.domain.handle)?;
                frame.reply(ResultCode::Success);
            }
        }
        Ok(())
    }

    /// Calls a service's control portal.
    ///
    /// A revoked portal means the service is gone.
    fn forward(&self, target: nre_abi::CapSel, request: &mut UtcbFrame) -> Result<(), Error> {
        self.kernel.call(target, request).map_err(Error::from_call)
    }

    fn portal_map(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        let size: u64 = frame.reader().pop()?;
        if size == 0 {
            return Err(Error::InvalidArgs);
        }
        let size = size
            .checked_add(PAGE_SIZE - 1)
            .map(|s| s & !(PAGE_SIZE - 1))
            .ok_or(Error::InvalidArgs)?;

        let addr = {
            let mut inner = call.domain.inner.lock();
            if let Some(max) = call.domain.config.max_mem
                && inner.mapped.saturating_add(size) > max
            {
                warn!(domain = %call.domain.handle, size, max, "memory limit reached");
                return Err(Error::CapacityExceeded);
            }
            let addr = inner.vspace.alloc_aligned(size, PAGE_SIZE)?;
            inner.mappings.insert(addr, size);
            inner.mapped += size;
            addr
        };
        debug!(domain = %call.domain.handle, addr, size, "mapped");
        frame.reply(ResultCode::Success);
        frame.push(addr)?;
        Ok(())
    }

    fn portal_unmap(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        let addr: u64 = frame.reader().pop()?;
        {
            let mut inner = call.domain.inner.lock();
            let size = inner.mappings.remove(&addr).ok_or(Error::NotFound)?;
            inner.vspace.free(addr, size)?;
            inner.mapped -= size;
        }
        debug!(domain = %call.domain.handle, addr, "unmapped");
        frame.reply(ResultCode::Success);
        Ok(())
    }

    fn portal_io(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        let mut input = frame.reader();
        let base: u64 = input.pop()?;
        let count: u64 = input.pop()?;
        if count == 0 {
            return Err(Error::InvalidArgs);
        }

        self.io_ports.lock().remove(base, count)?;
        if let Err(err) = self.kernel.assign_io(call.domain.pd(), base, count) {
            if let Err(free_err) = self.io_ports.lock().free(base, count) {
                error!(base, count, err = %free_err, "failed to return I/O ports");
            }
            return Err(err.into());
        }
        call.domain.inner.lock().io.push((base, count));
        info!(domain = %call.domain.handle, base, count, "I/O ports granted");
        frame.reply(ResultCode::Success);
        Ok(())
    }

    fn portal_gsi(&self, call: &Call<'_>, frame: &mut UtcbFrame) -> Result<(), Error> {
        let gsi: u32 = frame.reader().pop()?;
        if gsi >= self.config.gsi_count {
            return Err(Error::InvalidArgs);
        }
        {
            let mut owners = self.gsis.lock();
            if owners.contains_key(&gsi) {
                return Err(Error::PermissionDenied);
            }
            owners.insert(gsi, call.domain.handle);
        }
        if let Err(err) = self.kernel.assign_gsi(call.domain.pd(), gsi) {
            self.gsis.lock().remove(&gsi);
            return Err(err.into());
        }
        call.domain.inner.lock().gsis.push(gsi);
        info!(domain = %call.domain.handle, gsi, "GSI granted");
        frame.reply(ResultCode::Success);
        Ok(())
    }
}
