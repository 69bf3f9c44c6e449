// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the service registry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use nre_abi::{CpuId, DomainId};
use std::sync::Arc;
use std::thread;

fn domain(index: u32) -> DomainHandle {
    DomainHandle::new(DomainId::new(index), 0)
}

fn record(name: &str, owner: DomainHandle) -> ServiceRecord {
    ServiceRecord {
        name: name.into(),
        owner,
        cpus: CpuSet::first(2),
        portal: CapSel::new(0x8000),
        binding: CapSel::new(0x9000),
    }
}

#[test]
fn register_then_find() {
    let registry = ServiceRegistry::new();
    registry.register(record("console", domain(1))).unwrap();

    let found = registry.find("console").unwrap();
    assert_eq!(found.owner, domain(1));
    assert_eq!(found.portal, CapSel::new(0x8000));
    assert!(registry.find("timer").is_none());
}

#[test]
fn duplicate_name_rejected() {
    let registry = ServiceRegistry::new();
    registry.register(record("console", domain(1))).unwrap();
    assert_eq!(
        registry.register(record("console", domain(2))),
        Err(Error::DuplicateName)
    );
    // The first registration is untouched
    assert_eq!(registry.find("console").unwrap().owner, domain(1));
}

#[test]
fn invalid_registrations_rejected() {
    let registry = ServiceRegistry::new();
    assert_eq!(
        registry.register(record("", domain(1))),
        Err(Error::InvalidArgs)
    );
    let long = "x".repeat(MAX_NAME_LEN + 1);
    assert_eq!(
        registry.register(record(&long, domain(1))),
        Err(Error::InvalidArgs)
    );
    let mut no_cpus = record("idle", domain(1));
    no_cpus.cpus = CpuSet::EMPTY;
    assert_eq!(registry.register(no_cpus), Err(Error::InvalidArgs));
    assert!(registry.is_empty());
}

#[test]
fn unregister_requires_owner() {
    let registry = ServiceRegistry::new();
    registry.register(record("console", domain(1))).unwrap();

    assert_eq!(
        registry.unregister("console", domain(2)),
        Err(Error::PermissionDenied)
    );
    // Same index, newer generation: a different domain
    assert_eq!(
        registry.unregister("console", DomainHandle::new(DomainId::new(1), 1)),
        Err(Error::PermissionDenied)
    );
    assert_eq!(
        registry.unregister("missing", domain(1)),
        Err(Error::NotFound)
    );

    let removed = registry.unregister("console", domain(1)).unwrap();
    assert_eq!(removed.name, "console");
    assert!(registry.find("console").is_none());
}

#[test]
fn remove_owner_takes_only_its_services() {
    let registry = ServiceRegistry::new();
    registry.register(record("console", domain(1))).unwrap();
    registry.register(record("keyboard", domain(1))).unwrap();
    registry.register(record("timer", domain(2))).unwrap();

    let removed: Vec<String> = registry
        .remove_owner(domain(1))
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(removed, vec!["console".to_string(), "keyboard".to_string()]);
    assert_eq!(registry.names(), vec!["timer".to_string()]);

    assert!(registry.remove_owner(domain(1)).is_empty());
}

#[test]
fn portal_for_falls_back_to_first_cpu() {
    let mut rec = record("net", domain(1));
    rec.cpus = CpuSet::EMPTY
        .with(CpuId::new(2).unwrap())
        .with(CpuId::new(3).unwrap());

    assert_eq!(
        rec.portal_for(CpuId::new(3).unwrap()),
        Some(CapSel::new(0x8003))
    );
    assert_eq!(rec.portal_for(CpuId::BSP), Some(CapSel::new(0x8002)));
}

#[test]
fn concurrent_registration_of_one_name_has_one_winner() {
    let registry = Arc::new(ServiceRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.register(record("log", domain(i))).is_ok())
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(registry.len(), 1);
}
