// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Mock kernel for testing.
//!
//! Keeps kernel objects in a map keyed by selector and delivers portal calls
//! synchronously on the calling thread. Tests drive child domains by
//! calling portals directly or by raising exceptions on a context with
//! [`MockKernel::raise`].

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use nre_abi::{CapSel, CpuId, FaultInfo, PortalKind, UtcbFrame};
use spin::Mutex;

use super::traits::{Kernel, KernelError, Portal, PortalId};

/// Type of a mock kernel object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Protection domain.
    Pd,
    /// Execution context.
    Ec,
    /// Portal.
    Pt,
    /// Semaphore.
    Sm,
}

enum Object {
    Pd {
        name: String,
    },
    Ec {
        pd: CapSel,
        cpu: CpuId,
        event_base: CapSel,
        ip: Option<u64>,
    },
    Pt {
        ec: CapSel,
        badge: u64,
        handler: Arc<dyn Portal>,
    },
    Sm,
}

impl Object {
    const fn kind(&self) -> ObjectKind {
        match self {
            Self::Pd { .. } => ObjectKind::Pd,
            Self::Ec { .. } => ObjectKind::Ec,
            Self::Pt { .. } => ObjectKind::Pt,
            Self::Sm => ObjectKind::Sm,
        }
    }
}

#[derive(Default)]
struct MockState {
    objects: BTreeMap<u64, Object>,
    io: BTreeMap<u64, Vec<(u64, u64)>>,
    gsis: BTreeMap<u32, CapSel>,
    fail_starts: usize,
    revoked: Vec<(CapSel, u64)>,
}

impl MockState {
    fn insert(&mut self, sel: CapSel, object: Object) -> Result<(), KernelError> {
        if sel.is_null() || sel == CapSel::INVALID {
            return Err(KernelError::InvalidArgument);
        }
        if self.objects.contains_key(&sel.as_u64()) {
            return Err(KernelError::SelectorInUse);
        }
        self.objects.insert(sel.as_u64(), object);
        Ok(())
    }

    fn kind_of(&self, sel: CapSel) -> Option<ObjectKind> {
        self.objects.get(&sel.as_u64()).map(Object::kind)
    }

    fn expect_kind(&self, sel: CapSel, kind: ObjectKind) -> Result<(), KernelError> {
        if self.kind_of(sel) == Some(kind) {
            Ok(())
        } else {
            Err(KernelError::InvalidCapability)
        }
    }
}

/// In-memory kernel for host tests.
pub struct MockKernel {
    state: Mutex<MockState>,
}

impl MockKernel {
    /// Creates a kernel that only knows the root protection domain.
    #[must_use]
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.objects.insert(
            super::ROOT_PD.as_u64(),
            Object::Pd {
                name: "root".to_string(),
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    /// Makes the next `count` calls to [`Kernel::start`] fail.
    pub fn fail_next_starts(&self, count: usize) {
        self.state.lock().fail_starts = count;
    }

    /// Returns the type of the object at `sel`.
    #[must_use]
    pub fn object(&self, sel: CapSel) -> Option<ObjectKind> {
        self.state.lock().kind_of(sel)
    }

    /// Returns the number of live objects of one type.
    #[must_use]
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .count()
    }

    /// Returns the name a protection domain was created with.
    #[must_use]
    pub fn pd_name(&self, sel: CapSel) -> Option<String> {
        match self.state.lock().objects.get(&sel.as_u64()) {
            Some(Object::Pd { name }) => Some(name.clone()),
            _ => None,
        }
    }

    /// Returns the instruction pointer an execution context was started at.
    #[must_use]
    pub fn started_at(&self, ec: CapSel) -> Option<u64> {
        match self.state.lock().objects.get(&ec.as_u64()) {
            Some(Object::Ec { ip, .. }) => *ip,
            _ => None,
        }
    }

    /// Returns the CPU and event base of an execution context.
    #[must_use]
    pub fn ec_info(&self, ec: CapSel) -> Option<(CapSel, CpuId, CapSel)> {
        match self.state.lock().objects.get(&ec.as_u64()) {
            Some(Object::Ec {
                pd,
                cpu,
                event_base,
                ..
            }) => Some((*pd, *cpu, *event_base)),
            _ => None,
        }
    }

    /// Returns the badge of a portal.
    #[must_use]
    pub fn portal_badge(&self, sel: CapSel) -> Option<u64> {
        match self.state.lock().objects.get(&sel.as_u64()) {
            Some(Object::Pt { badge, .. }) => Some(*badge),
            _ => None,
        }
    }

    /// Returns the I/O port ranges granted to `pd`.
    #[must_use]
    pub fn io_ports(&self, pd: CapSel) -> Vec<(u64, u64)> {
        self.state
            .lock()
            .io
            .get(&pd.as_u64())
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the domain a GSI is routed to.
    #[must_use]
    pub fn gsi_owner(&self, gsi: u32) -> Option<CapSel> {
        self.state.lock().gsis.get(&gsi).copied()
    }

    /// Returns every revoke issued so far.
    #[must_use]
    pub fn revocations(&self) -> Vec<(CapSel, u64)> {
        self.state.lock().revoked.clone()
    }

    /// Delivers an exception of `ec` to its event portal of `kind`.
    ///
    /// This is what the kernel does when a context starts, faults or exits.
    pub fn raise(
        &self,
        ec: CapSel,
        kind: PortalKind,
        frame: &mut UtcbFrame,
    ) -> Result<(), KernelError> {
        let (_, _, event_base) = self.ec_info(ec).ok_or(KernelError::InvalidCapability)?;
        let sel = event_base
            .offset(kind.offset())
            .ok_or(KernelError::InvalidCapability)?;
        self.call(sel, frame)
    }

    /// Lets `ec` return from its entry function.
    pub fn exit_thread(&self, ec: CapSel) -> Result<UtcbFrame, KernelError> {
        let mut frame = UtcbFrame::new();
        FaultInfo::thread_exit()
            .write_to(&mut frame)
            .map_err(|_| KernelError::InvalidArgument)?;
        self.raise(ec, PortalKind::PageFault, &mut frame)?;
        Ok(frame)
    }
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel for MockKernel {
    fn create_pd(&self, sel: CapSel, name: &str) -> Result<(), KernelError> {
        self.state.lock().insert(
            sel,
            Object::Pd {
                name: name.to_string(),
            },
        )
    }

    fn create_ec(
        &self,
        sel: CapSel,
        pd: CapSel,
        cpu: CpuId,
        event_base: CapSel,
    ) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        state.expect_kind(pd, ObjectKind::Pd)?;
        state.insert(
            sel,
            Object::Ec {
                pd,
                cpu,
                event_base,
                ip: None,
            },
        )
    }

    fn create_pt(
        &self,
        sel: CapSel,
        ec: CapSel,
        badge: u64,
        handler: Arc<dyn Portal>,
    ) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        state.expect_kind(ec, ObjectKind::Ec)?;
        state.insert(sel, Object::Pt { ec, badge, handler })
    }

    fn create_sm(&self, sel: CapSel, _count: u64) -> Result<(), KernelError> {
        self.state.lock().insert(sel, Object::Sm)
    }

    fn start(&self, ec: CapSel, entry: u64) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.fail_starts > 0 {
            state.fail_starts -= 1;
            return Err(KernelError::OutOfResources);
        }
        match state.objects.get_mut(&ec.as_u64()) {
            Some(Object::Ec { ip, .. }) => {
                if ip.is_some() {
                    return Err(KernelError::InvalidArgument);
                }
                *ip = Some(entry);
                Ok(())
            }
            _ => Err(KernelError::InvalidCapability),
        }
    }

    fn assign_io(&self, pd: CapSel, base: u64, count: u64) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        state.expect_kind(pd, ObjectKind::Pd)?;
        state.io.entry(pd.as_u64()).or_default().push((base, count));
        Ok(())
    }

    fn assign_gsi(&self, pd: CapSel, gsi: u32) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        state.expect_kind(pd, ObjectKind::Pd)?;
        if state.gsis.contains_key(&gsi) {
            return Err(KernelError::InvalidArgument);
        }
        state.gsis.insert(gsi, pd);
        Ok(())
    }

    fn revoke(&self, sel: CapSel, count: u64) {
        let mut state = self.state.lock();
        state.revoked.push((sel, count));
        let first = sel.as_u64();
        let last = first.saturating_add(count);
        let doomed: Vec<u64> = state.objects.range(first..last).map(|(k, _)| *k).collect();
        for key in doomed {
            if matches!(state.objects.remove(&key), Some(Object::Pd { .. })) {
                // A dead domain takes its contexts and hardware grants along
                let pd = CapSel::new(key);
                state
                    .objects
                    .retain(|_, o| !matches!(o, Object::Ec { pd: owner, .. } if *owner == pd));
                state.io.remove(&key);
                state.gsis.retain(|_, owner| *owner != pd);
            }
        }
    }

    fn call(&self, sel: CapSel, frame: &mut UtcbFrame) -> Result<(), KernelError> {
        let (handler, id) = {
            let state = self.state.lock();
            match state.objects.get(&sel.as_u64()) {
                Some(Object::Pt { ec, badge, handler }) => {
                    // The handler context must still exist
                    state.expect_kind(*ec, ObjectKind::Ec)?;
                    (Arc::clone(handler), PortalId { sel, badge: *badge })
                }
                _ => return Err(KernelError::InvalidCapability),
            }
        };
        // The lock is released so the handler can use the kernel itself
        handler.call(id, frame);
        Ok(())
    }
}
