// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Child manager.
//!
//! Loads boot modules as child protection domains and answers the portals
//! they use to talk to the root task. Every domain occupies one slot of a
//! fixed table and one slice of the portal selector area, so the domain and
//! CPU of any portal call follow from the selector alone.
//!
//! # Lifecycle
//!
//! A domain is `Loading` while its kernel objects are created and `Running`
//! once its first context was started. Each started context and each
//! external holder counts one reference. When the last reference goes, the
//! domain turns `Dying`: its services leave the registry and its slot stops
//! resolving. Portal handlers that resolved the domain before that point
//! keep running; the last one to return releases the domain's resources,
//! makes the slot reusable and marks it `Destroyed`.
//!
//! # Lock order
//!
//! domain lock, then registry, then table. The selector, I/O port, GSI and
//! observer locks are leaves.

mod config;
mod domain;
mod portals;
mod table;

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod table_test;

pub use config::{
    ChildConfig, DEFAULT_CHILD_VSPACE_BASE, DEFAULT_CHILD_VSPACE_END, DEFAULT_GSI_COUNT,
    DEFAULT_MAX_DOMAINS, DEFAULT_OBJECT_SELECTORS, DEFAULT_PORTAL_BASE, IO_PORT_COUNT,
    ManagerConfig,
};
pub use domain::{DomainInfo, DomainState, OBJECTS_PER_DOMAIN};
pub use table::{DomainHandle, DomainTable, SlotState};

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use nre_abi::{CapSel, CpuId, CpuSet, DomainId, PAGE_SIZE, PortalKind, SelectorLayout};
use spin::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::image::{ImageLoader, LoadedImage};
use crate::platform::{Kernel, Portal, ROOT_PD};
use crate::region::RegionAllocator;
use crate::registry::{ServiceRecord, ServiceRegistry};
use crate::slots::SlotAllocator;
use domain::{Domain, DomainInner};
use portals::ManagerPortal;

/// Handler contexts the root task runs per CPU: exceptions, service
/// requests, resource requests.
pub const HANDLERS_PER_CPU: u64 = 3;

/// Receives notice of destroyed domains.
///
/// Services register an observer to drop the sessions of clients that went
/// away without closing them.
pub trait DomainObserver: Send + Sync {
    /// Called once per domain after its resources were released.
    fn domain_destroyed(&self, domain: DomainHandle);
}

/// Owner of all child domains.
pub struct ChildManager {
    config: ManagerConfig,
    layout: SelectorLayout,
    kernel: Arc<dyn Kernel>,
    loader: Arc<dyn ImageLoader>,
    registry: ServiceRegistry,
    table: RwLock<DomainTable<Arc<Domain>>>,
    selectors: Mutex<SlotAllocator>,
    io_ports: Mutex<RegionAllocator>,
    gsis: Mutex<BTreeMap<u32, DomainHandle>>,
    /// First handler context per served CPU.
    handlers: BTreeMap<CpuId, CapSel>,
    observers: Mutex<Vec<Weak<dyn DomainObserver>>>,
    portal: Arc<dyn Portal>,
}

/// A portal call that resolved to a live domain.
///
/// Keeps the domain from being finalized until dropped.
pub(crate) struct Call<'a> {
    manager: &'a ChildManager,
    domain: Arc<Domain>,
    cpu: CpuId,
    kind: PortalKind,
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        if self.domain.leave() {
            self.manager.try_finalize(&self.domain);
        }
    }
}

impl ChildManager {
    /// Creates the manager and its handler contexts.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] if the configuration is inconsistent
    /// - [`Error::CapacityExceeded`] if the object selectors cannot hold the handlers
    /// - [`Error::Kernel`] if a handler context cannot be created
    pub fn new(
        config: ManagerConfig,
        kernel: Arc<dyn Kernel>,
        loader: Arc<dyn ImageLoader>,
    ) -> Result<Arc<Self>, Error> {
        let layout = config.validate()?;
        let (first_sel, end_sel) = config.object_selectors;
        let mut selectors = SlotAllocator::new(first_sel, end_sel)?;
        let (io_start, io_end) = config.io_ports;
        let io_ports = RegionAllocator::with_range(io_start, io_end - io_start)?;

        let mut handlers = BTreeMap::new();
        for cpu in config.cpus {
            let first = selectors.alloc_range(HANDLERS_PER_CPU)?;
            for i in 0..HANDLERS_PER_CPU {
                let ec = first.offset(i).ok_or(Error::CapacityExceeded)?;
                kernel.create_ec(ec, ROOT_PD, cpu, CapSel::NULL)?;
            }
            handlers.insert(cpu, first);
        }
        debug!(
            cpus = ?config.cpus,
            portal_base = %layout.base(),
            stride = layout.stride(),
            "child manager handlers created"
        );

        let max_domains = config.max_domains as usize;
        Ok(Arc::new_cyclic(|this: &Weak<Self>| Self {
            config,
            layout,
            kernel,
            loader,
            registry: ServiceRegistry::new(),
            table: RwLock::new(DomainTable::new(max_domains)),
            selectors: Mutex::new(selectors),
            io_ports: Mutex::new(io_ports),
            gsis: Mutex::new(BTreeMap::new()),
            handlers,
            observers: Mutex::new(Vec::new()),
            portal: Arc::new(ManagerPortal::new(this.clone())),
        }))
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Returns the portal selector layout.
    #[must_use]
    pub const fn layout(&self) -> &SelectorLayout {
        &self.layout
    }

    /// Returns the service registry.
    #[must_use]
    pub const fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Returns the kernel interface.
    #[must_use]
    pub fn kernel(&self) -> &Arc<dyn Kernel> {
        &self.kernel
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Loads a boot module as a new domain.
    ///
    /// The first context runs on the CPU given by `cpu=` on the command
    /// line, or on the first served CPU.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] for a malformed command line or an unserved CPU
    /// - [`Error::LoadError`] if the image loader rejects the image or its
    ///   segments fall outside the child address space
    /// - [`Error::CapacityExceeded`] if the table or selector space is full
    /// - [`Error::Kernel`] if creating or starting a kernel object fails
    pub fn load(&self, base: u64, size: u64, cmdline: &str) -> Result<DomainHandle, Error> {
        let config = ChildConfig::parse(cmdline)?;
        let cpu = match config.cpu {
            Some(cpu) => cpu,
            None => self.config.cpus.iter().next().ok_or(Error::InvalidArgs)?,
        };
        self.load_on(base, size, config, cpu)
    }

    /// Loads a boot module as a new domain on `cpu`.
    pub fn load_on(
        &self,
        base: u64,
        size: u64,
        config: ChildConfig,
        cpu: CpuId,
    ) -> Result<DomainHandle, Error> {
        if !self.config.cpus.contains(cpu) {
            return Err(Error::InvalidArgs);
        }
        let image = self.loader.load(base, size, &config.cmdline).map_err(|err| {
            warn!(name = %config.name, %err, "image rejected");
            Error::LoadError
        })?;
        let vspace = self.child_vspace(&image).inspect_err(|_| {
            warn!(name = %config.name, "image segments outside child address space");
        })?;

        let objects = self.selectors.lock().alloc_range(OBJECTS_PER_DOMAIN)?;
        let handle = match self.table.write().reserve() {
            Ok(handle) => handle,
            Err(err) => {
                self.free_selectors(objects, OBJECTS_PER_DOMAIN);
                return Err(err);
            }
        };

        let name = config.name.clone();
        let domain = Arc::new(Domain::new(handle, config, cpu, objects, image.entry, vspace));
        match self.build(&domain) {
            Ok(()) => {
                info!(domain = %handle, %name, %cpu, entry = image.entry, "domain running");
                Ok(handle)
            }
            Err(err) => {
                error!(domain = %handle, %name, %err, "failed to start domain");
                self.rollback(&domain);
                Err(err)
            }
        }
    }

    /// Computes the free address space left by an image.
    fn child_vspace(&self, image: &LoadedImage) -> Result<RegionAllocator, Error> {
        let (start, end) = self.config.child_vspace;
        let mut vspace = RegionAllocator::with_range(start, end - start)?;

        // Page ranges of all segments, merged so shared pages are taken once
        let mut ranges: Vec<(u64, u64)> = image
            .segments
            .iter()
            .map(|seg| {
                let first = seg.vaddr & !(PAGE_SIZE - 1);
                let last = seg
                    .vaddr
                    .checked_add(seg.size)
                    .and_then(|e| e.checked_add(PAGE_SIZE - 1))
                    .map(|e| e & !(PAGE_SIZE - 1))
                    .ok_or(Error::LoadError)?;
                Ok((first, last))
            })
            .collect::<Result<_, Error>>()?;
        ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(ranges.len());
        for (first, last) in ranges {
            match merged.last_mut() {
                Some(prev) if first <= prev.1 => prev.1 = prev.1.max(last),
                _ => merged.push((first, last)),
            }
        }
        for (first, last) in merged {
            if last > first {
                vspace.remove(first, last - first).map_err(|_| Error::LoadError)?;
            }
        }
        Ok(vspace)
    }

    /// Creates the kernel objects of a reserved domain and starts it.
    fn build(&self, domain: &Arc<Domain>) -> Result<(), Error> {
        let handle = domain.handle;
        let index = u64::from(handle.id().as_u32());

        self.kernel.create_pd(domain.pd(), &domain.config.name)?;
        for cpu in self.config.cpus {
            for kind in PortalKind::ALL {
                let sel = self.layout.portal(index, cpu, kind).ok_or(Error::CapacityExceeded)?;
                let ec = self.handler_ec(cpu, kind)?;
                self.kernel
                    .create_pt(sel, ec, u64::from(handle.generation()), Arc::clone(&self.portal))?;
            }
        }

        self.table.write().publish(handle, Arc::clone(domain))?;

        let event_base = self
            .layout
            .portal(index, domain.cpu, PortalKind::Startup)
            .ok_or(Error::CapacityExceeded)?;
        self.kernel.create_ec(domain.ec(), domain.pd(), domain.cpu, event_base)?;
        self.kernel.start(domain.ec(), domain.entry)?;

        let mut inner = domain.inner.lock();
        if inner.state == DomainState::Loading {
            inner.state = DomainState::Running;
        }
        Ok(())
    }

    /// Undoes a failed [`Self::build`]. No context of the domain runs.
    fn rollback(&self, domain: &Arc<Domain>) {
        let handle = domain.handle;
        domain.inner.lock().state = DomainState::Destroyed;
        self.revoke_domain(domain);
        let mut table = self.table.write();
        if table.state(handle) == SlotState::Live
            && let Err(err) = table.retire(handle)
        {
            error!(domain = %handle, %err, "failed to retire slot after load failure");
        }
        if let Err(err) = table.vacate(handle) {
            error!(domain = %handle, %err, "failed to vacate slot after load failure");
        }
    }

    fn handler_ec(&self, cpu: CpuId, kind: PortalKind) -> Result<CapSel, Error> {
        let group = match kind {
            PortalKind::Startup | PortalKind::PageFault | PortalKind::Io | PortalKind::Gsi => 0,
            PortalKind::Service => 1,
            PortalKind::Map | PortalKind::Unmap => 2,
        };
        self.handlers
            .get(&cpu)
            .and_then(|first| first.offset(group))
            .ok_or(Error::InvalidArgs)
    }

    fn free_selectors(&self, sel: CapSel, count: u64) {
        if let Err(err) = self.selectors.lock().free_range(sel, count) {
            error!(%sel, count, %err, "failed to free selectors");
        }
    }

    /// Revokes every kernel object of a domain and frees its selectors.
    fn revoke_domain(&self, domain: &Domain) {
        let index = u64::from(domain.handle.id().as_u32());
        if let Some(base) = self.layout.domain_base(index) {
            self.kernel.revoke(base, self.layout.stride());
        }
        self.kernel.revoke(domain.objects, OBJECTS_PER_DOMAIN);
        self.free_selectors(domain.objects, OBJECTS_PER_DOMAIN);
    }

    // =========================================================================
    // Portal Resolution
    // =========================================================================

    /// Resolves a portal call to its live domain.
    fn enter(&self, sel: CapSel, badge: u64) -> Result<Call<'_>, Error> {
        let addr = self.layout.resolve(sel).ok_or(Error::NotFound)?;
        let id = u32::try_from(addr.domain).map_err(|_| Error::NotFound)?;
        let generation = u32::try_from(badge).map_err(|_| Error::NotFound)?;
        let handle = DomainHandle::new(DomainId::new(id), generation);

        let table = self.table.read();
        let domain = table.get(handle).ok_or(Error::NotFound)?;
        // Counted under the table lock, so retiring the slot cannot miss it
        domain.enter();
        Ok(Call {
            manager: self,
            domain: Arc::clone(domain),
            cpu: addr.cpu,
            kind: addr.kind,
        })
    }

    /// Returns the CPU a portal selector belongs to.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for selectors outside the portal area or in
    /// padding.
    pub fn get_cpu(&self, sel: CapSel) -> Result<CpuId, Error> {
        self.layout.cpu_of(sel).ok_or(Error::NotFound)
    }

    /// Returns the live domain a portal selector belongs to.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the selector is outside the area or its slot
    /// holds no live domain.
    pub fn get_domain(&self, sel: CapSel) -> Result<DomainHandle, Error> {
        let index = self.layout.domain_of(sel).ok_or(Error::NotFound)?;
        let id = u32::try_from(index).map_err(|_| Error::NotFound)?;
        self.table
            .read()
            .get_index(DomainId::new(id))
            .map(|(handle, _)| handle)
            .ok_or(Error::NotFound)
    }

    /// Returns the selector of one of a live domain's portals.
    pub fn portal(
        &self,
        handle: DomainHandle,
        cpu: CpuId,
        kind: PortalKind,
    ) -> Result<CapSel, Error> {
        if self.table.read().get(handle).is_none() {
            return Err(Error::NotFound);
        }
        self.layout
            .portal(u64::from(handle.id().as_u32()), cpu, kind)
            .filter(|_| self.config.cpus.contains(cpu))
            .ok_or(Error::NotFound)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns a snapshot of every live domain in slot order.
    #[must_use]
    pub fn domains(&self) -> Vec<DomainInfo> {
        let domains: Vec<Arc<Domain>> = self
            .table
            .read()
            .live()
            .map(|(_, domain)| Arc::clone(domain))
            .collect();
        domains.iter().map(|domain| domain.info()).collect()
    }

    /// Returns a snapshot of one live domain.
    pub fn domain(&self, handle: DomainHandle) -> Result<DomainInfo, Error> {
        let domain = self.lookup(handle)?;
        Ok(domain.info())
    }

    /// Returns the lifecycle state of a domain.
    ///
    /// Handles of vacated slots report [`DomainState::Destroyed`].
    #[must_use]
    pub fn state(&self, handle: DomainHandle) -> DomainState {
        let domain = {
            let table = self.table.read();
            match table.state(handle) {
                SlotState::Vacant => return DomainState::Destroyed,
                SlotState::Reserved => return DomainState::Loading,
                SlotState::Retired => return DomainState::Dying,
                SlotState::Live => table.get(handle).map(Arc::clone),
            }
        };
        domain.map_or(DomainState::Destroyed, |d| d.inner.lock().state)
    }

    /// Returns the number of occupied table slots, dying ones included.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.table.read().occupied()
    }

    fn lookup(&self, handle: DomainHandle) -> Result<Arc<Domain>, Error> {
        self.table
            .read()
            .get(handle)
            .map(Arc::clone)
            .ok_or(Error::NotFound)
    }

    // =========================================================================
    // References and Destruction
    // =========================================================================

    /// Adds an external reference to a running domain.
    pub fn retain(&self, handle: DomainHandle) -> Result<(), Error> {
        let domain = self.lookup(handle)?;
        let mut inner = domain.inner.lock();
        if inner.state != DomainState::Running {
            return Err(Error::NotFound);
        }
        inner.refs += 1;
        Ok(())
    }

    /// Drops a reference taken with [`Self::retain`].
    pub fn release(&self, handle: DomainHandle) -> Result<(), Error> {
        let domain = self.lookup(handle)?;
        if domain.inner.lock().state != DomainState::Running {
            return Err(Error::NotFound);
        }
        self.drop_ref(&domain);
        Ok(())
    }

    /// Destroys a running domain regardless of its references.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the handle does not name a running domain.
    pub fn kill(&self, handle: DomainHandle) -> Result<(), Error> {
        let domain = self.lookup(handle)?;
        {
            let mut inner = domain.inner.lock();
            if inner.state != DomainState::Running {
                return Err(Error::NotFound);
            }
            info!(domain = %handle, name = %domain.config.name, "killing domain");
            inner.refs = 0;
            self.begin_destroy(&domain, &mut inner);
        }
        self.try_finalize(&domain);
        Ok(())
    }

    /// Drops one reference; the last one starts destruction.
    fn drop_ref(&self, domain: &Arc<Domain>) {
        {
            let mut inner = domain.inner.lock();
            if matches!(inner.state, DomainState::Dying | DomainState::Destroyed) {
                warn!(domain = %domain.handle, "reference dropped on dying domain");
                return;
            }
            if inner.refs == 0 {
                error!(domain = %domain.handle, "reference count underflow");
            }
            inner.refs = inner.refs.saturating_sub(1);
            if inner.refs > 0 {
                return;
            }
            self.begin_destroy(domain, &mut inner);
        }
        self.try_finalize(domain);
    }

    /// Makes a domain unreachable. Called with the domain lock held.
    fn begin_destroy(&self, domain: &Domain, inner: &mut DomainInner) {
        domain.mark_dying(inner);
        for record in self.registry.remove_owner(domain.handle) {
            self.release_binding(&record);
        }
        if let Err(err) = self.table.write().retire(domain.handle) {
            error!(domain = %domain.handle, %err, "dying domain was not live");
        }
        info!(domain = %domain.handle, name = %domain.config.name, "domain dying");
    }

    /// Finalizes a dying domain once no handler uses it any more.
    fn try_finalize(&self, domain: &Arc<Domain>) {
        if domain.claim_finalize() {
            self.finalize(domain);
        }
    }

    fn finalize(&self, domain: &Domain) {
        let handle = domain.handle;
        let (io, gsis) = {
            let mut inner = domain.inner.lock();
            inner.state = DomainState::Destroyed;
            inner.mappings.clear();
            inner.mapped = 0;
            (core::mem::take(&mut inner.io), core::mem::take(&mut inner.gsis))
        };

        self.revoke_domain(domain);
        {
            let mut ports = self.io_ports.lock();
            for (base, count) in io {
                if let Err(err) = ports.free(base, count) {
                    error!(domain = %handle, base, count, %err, "failed to release I/O ports");
                }
            }
        }
        {
            let mut owners = self.gsis.lock();
            for gsi in gsis {
                owners.remove(&gsi);
            }
        }
        if let Err(err) = self.table.write().vacate(handle) {
            error!(domain = %handle, %err, "failed to vacate slot");
        }
        info!(domain = %handle, name = %domain.config.name, "domain destroyed");

        let observers: Vec<Arc<dyn DomainObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.domain_destroyed(handle);
        }
    }

    /// Registers an observer for domain destruction.
    ///
    /// The manager keeps only a weak reference.
    pub fn add_observer(&self, observer: Weak<dyn DomainObserver>) {
        self.observers.lock().push(observer);
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Registers a service provided by the root task itself.
    pub fn register_root_service(
        &self,
        name: &str,
        portal: CapSel,
        cpus: CpuSet,
    ) -> Result<CapSel, Error> {
        self.register_service(DomainHandle::ROOT, String::from(name), portal, cpus)
    }

    /// Registers a service on behalf of `owner` and returns its binding
    /// semaphore.
    fn register_service(
        &self,
        owner: DomainHandle,
        name: String,
        portal: CapSel,
        cpus: CpuSet,
    ) -> Result<CapSel, Error> {
        if !cpus.is_subset(CpuSet::first(self.config.cpu_count)) {
            return Err(Error::InvalidArgs);
        }
        let binding = self.selectors.lock().alloc()?;
        if let Err(err) = self.kernel.create_sm(binding, 0) {
            self.free_selectors(binding, 1);
            return Err(err.into());
        }
        let record = ServiceRecord {
            name,
            owner,
            cpus,
            portal,
            binding,
        };
        if let Err(err) = self.registry.register(record) {
            self.kernel.revoke(binding, 1);
            self.free_selectors(binding, 1);
            return Err(err);
        }
        Ok(binding)
    }

    /// Unregisters a service of `owner`.
    pub fn unregister_service(&self, name: &str, owner: DomainHandle) -> Result<(), Error> {
        let record = self.registry.unregister(name, owner)?;
        self.release_binding(&record);
        Ok(())
    }

    fn release_binding(&self, record: &ServiceRecord) {
        self.kernel.revoke(record.binding, 1);
        self.free_selectors(record.binding, 1);
    }

    /// Polls the registry until all `names` are registered.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if a name is still missing after `max_spins`
    /// polls.
    pub fn wait_for_services(&self, names: &[&str], max_spins: usize) -> Result<(), Error> {
        for _ in 0..=max_spins {
            if names.iter().all(|name| self.registry.find(name).is_some()) {
                return Ok(());
            }
            #[cfg(any(test, feature = "std"))]
            std::thread::yield_now();
            #[cfg(not(any(test, feature = "std")))]
            core::hint::spin_loop();
        }
        let missing: Vec<&&str> = names
            .iter()
            .filter(|name| self.registry.find(name).is_none())
            .collect();
        warn!(?missing, "services did not appear");
        Err(Error::NotFound)
    }
}
