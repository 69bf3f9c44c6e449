// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Service registry.
//!
//! System-wide map from service names to the portal capability clients use
//! to reach the service. Lookups never block on a missing name: callers
//! that need a service to appear poll [`ServiceRegistry::find`].

#[cfg(test)]
mod registry_test;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use nre_abi::{CapSel, CpuSet};
use spin::RwLock;
use tracing::{debug, info};

use crate::Error;
use crate::child::DomainHandle;

/// Longest accepted service name in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// A registered service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Unique name.
    pub name: String,
    /// Domain that registered the service.
    pub owner: DomainHandle,
    /// CPUs the service accepts calls on.
    pub cpus: CpuSet,
    /// First selector of the service's per-CPU control portals.
    pub portal: CapSel,
    /// Semaphore handed to the owner as proof of registration.
    pub binding: CapSel,
}

impl ServiceRecord {
    /// Returns the control portal for `cpu`, or for the first available CPU
    /// if the service does not run on `cpu`.
    #[must_use]
    pub fn portal_for(&self, cpu: nre_abi::CpuId) -> Option<CapSel> {
        let target = if self.cpus.contains(cpu) {
            cpu
        } else {
            self.cpus.iter().next()?
        };
        self.portal.offset(u64::from(target.as_u16()))
    }
}

/// Registry of named services.
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<String, ServiceRecord>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a service.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgs`] if the name is empty or too long, or `cpus` is empty
    /// - [`Error::DuplicateName`] if the name is taken
    pub fn register(&self, record: ServiceRecord) -> Result<(), Error> {
        if record.name.is_empty() || record.name.len() > MAX_NAME_LEN || record.cpus.is_empty() {
            return Err(Error::InvalidArgs);
        }
        let mut services = self.services.write();
        if services.contains_key(&record.name) {
            debug!(name = %record.name, owner = %record.owner, "duplicate service registration");
            return Err(Error::DuplicateName);
        }
        info!(
            name = %record.name,
            owner = %record.owner,
            cpus = ?record.cpus,
            "service registered"
        );
        services.insert(record.name.clone(), record);
        Ok(())
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ServiceRecord> {
        self.services.read().get(name).cloned()
    }

    /// Removes a service on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if no service has that name
    /// - [`Error::PermissionDenied`] if `caller` did not register it
    pub fn unregister(&self, name: &str, caller: DomainHandle) -> Result<ServiceRecord, Error> {
        let mut services = self.services.write();
        let record = services.get(name).ok_or(Error::NotFound)?;
        if record.owner != caller {
            return Err(Error::PermissionDenied);
        }
        let record = services.remove(name).ok_or(Error::NotFound)?;
        info!(name = %record.name, owner = %record.owner, "service unregistered");
        Ok(record)
    }

    /// Removes every service owned by `owner` and returns them.
    pub fn remove_owner(&self, owner: DomainHandle) -> Vec<ServiceRecord> {
        let mut services = self.services.write();
        let names: Vec<String> = services
            .values()
            .filter(|record| record.owner == owner)
            .map(|record| record.name.clone())
            .collect();
        names
            .iter()
            .filter_map(|name| services.remove(name))
            .inspect(|record| info!(name = %record.name, owner = %owner, "service removed"))
            .collect()
    }

    /// Returns the registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
