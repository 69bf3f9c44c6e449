// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Child-side stubs for the root task portals.
//!
//! Encodes requests in the wire format documented in [`nre_abi::ipc`] and
//! decodes the replies. Children use this through their own kernel
//! interface; host tests use it to play the part of a child.

use nre_abi::{
    CapSel, CpuId, CpuSet, FaultInfo, FrameReader, PortalKind, ServiceCommand, SessionId,
    UtcbFrame,
};

use crate::Error;
use crate::platform::Kernel;

/// A session as seen by its client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionRef {
    /// Identity assigned by the service.
    pub id: SessionId,
    /// First portal selector of the session.
    pub caps: CapSel,
}

impl SessionRef {
    /// Returns the session portal for `cpu`.
    #[must_use]
    pub fn portal(&self, cpu: CpuId) -> Option<CapSel> {
        self.caps.offset(u64::from(cpu.as_u16()))
    }
}

/// One CPU's bank of root task portals.
pub struct RootPortals<'k> {
    kernel: &'k dyn Kernel,
    bank: CapSel,
}

impl<'k> RootPortals<'k> {
    /// Creates stubs for the bank starting at `bank` (the startup portal).
    #[must_use]
    pub const fn new(kernel: &'k dyn Kernel, bank: CapSel) -> Self {
        Self { kernel, bank }
    }

    fn call<'f>(
        &self,
        kind: PortalKind,
        frame: &'f mut UtcbFrame,
    ) -> Result<FrameReader<'f>, Error> {
        let sel = self.bank.offset(kind.offset()).ok_or(Error::InvalidArgs)?;
        self.kernel.call(sel, frame).map_err(Error::from_call)?;
        let frame: &'f UtcbFrame = frame;
        Ok(frame.result()?)
    }

    /// Asks for the entry point, as a starting context does.
    pub fn startup(&self) -> Result<u64, Error> {
        let mut frame = UtcbFrame::new();
        Ok(self.call(PortalKind::Startup, &mut frame)?.pop()?)
    }

    /// Reports a fault; the faulting context is gone afterwards.
    pub fn fault(&self, fault: FaultInfo) -> Result<(), Error> {
        let mut frame = UtcbFrame::new();
        fault.write_to(&mut frame)?;
        self.call(PortalKind::PageFault, &mut frame)?;
        Ok(())
    }

    /// Reports a regular context exit.
    pub fn exit(&self) -> Result<(), Error> {
        self.fault(FaultInfo::thread_exit())
    }

    /// Registers a service and returns its binding selector.
    pub fn register(&self, name: &str, cpus: CpuSet, portal: CapSel) -> Result<CapSel, Error> {
        let mut frame = UtcbFrame::new();
        frame.push(ServiceCommand::Register)?;
        frame.push_str(name)?;
        frame.push(cpus)?;
        frame.translate(portal)?;
        Ok(self.call(PortalKind::Service, &mut frame)?.delegated(0)?)
    }

    /// Unregisters a service of this domain.
    pub fn unregister(&self, name: &str) -> Result<(), Error> {
        let mut frame = UtcbFrame::new();
        frame.push(ServiceCommand::Unregister)?;
        frame.push_str(name)?;
        self.call(PortalKind::Service, &mut frame)?;
        Ok(())
    }

    /// Opens a session with a named service.
    pub fn open_session(&self, name: &str, args: &str) -> Result<SessionRef, Error> {
        let mut frame = UtcbFrame::new();
        frame.push(ServiceCommand::OpenSession)?;
        frame.push_str(name)?;
        frame.push_str(args)?;
        let mut reply = self.call(PortalKind::Service, &mut frame)?;
        let id = reply.pop()?;
        let caps = reply.delegated(0)?;
        Ok(SessionRef { id, caps })
    }

    /// Closes a session.
    pub fn close_session(&self, name: &str, session: &SessionRef) -> Result<(), Error> {
        let mut frame = UtcbFrame::new();
        frame.push(ServiceCommand::CloseSession)?;
        frame.push_str(name)?;
        frame.push(session.id)?;
        self.call(PortalKind::Service, &mut frame)?;
        Ok(())
    }

    /// Maps `size` bytes of fresh memory and returns the address.
    pub fn map(&self, size: u64) -> Result<u64, Error> {
        let mut frame = UtcbFrame::new();
        frame.push(size)?;
        Ok(self.call(PortalKind::Map, &mut frame)?.pop()?)
    }

    /// Unmaps memory obtained with [`Self::map`].
    pub fn unmap(&self, addr: u64) -> Result<(), Error> {
        let mut frame = UtcbFrame::new();
        frame.push(addr)?;
        self.call(PortalKind::Unmap, &mut frame)?;
        Ok(())
    }

    /// Requests the I/O ports `[base, base + count)`.
    pub fn alloc_io(&self, base: u64, count: u64) -> Result<(), Error> {
        let mut frame = UtcbFrame::new();
        frame.push(base)?;
        frame.push(count)?;
        self.call(PortalKind::Io, &mut frame)?;
        Ok(())
    }

    /// Requests a global system interrupt.
    pub fn alloc_gsi(&self, gsi: u32) -> Result<(), Error> {
        let mut frame = UtcbFrame::new();
        frame.push(gsi)?;
        self.call(PortalKind::Gsi, &mut frame)?;
        Ok(())
    }
}

/// Calls a session portal with a prepared request.
///
/// Returns a reader positioned after the result code.
pub fn call_session<'f>(
    kernel: &dyn Kernel,
    session: &SessionRef,
    cpu: CpuId,
    frame: &'f mut UtcbFrame,
) -> Result<FrameReader<'f>, Error> {
    let sel = session.portal(cpu).ok_or(Error::InvalidArgs)?;
    kernel.call(sel, frame).map_err(Error::from_call)?;
    let frame: &'f UtcbFrame = frame;
    Ok(frame.result()?)
}
