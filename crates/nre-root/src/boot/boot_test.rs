// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the boot sequence.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::child::{DomainState, ManagerConfig};
use crate::image::MockLoader;
use crate::platform::MockKernel;
use alloc::sync::Arc;
use nre_abi::CapSel;

const ROOT: u64 = 0x80_0000;
const A: u64 = 0x100_0000;
const B: u64 = 0x110_0000;
const C: u64 = 0x120_0000;
const BROKEN: u64 = 0x130_0000;

fn manager(cpus: u16) -> Arc<ChildManager> {
    let kernel = Arc::new(MockKernel::new());
    let loader = Arc::new(MockLoader::new());
    for base in [A, B, C] {
        loader.add(base, 0x40_1000);
    }
    ChildManager::new(ManagerConfig::default().with_cpus(cpus), kernel, loader).unwrap()
}

fn with_required(manager: &ChildManager) {
    let portals = [CapSel::new(0x7_0000), CapSel::new(0x7_0010)];
    for (name, portal) in REQUIRED_SERVICES.iter().zip(portals) {
        manager
            .register_root_service(name, portal, CpuSet::first(1))
            .unwrap();
    }
}

fn module(base: u64, cmdline: &str) -> BootModule<'_> {
    BootModule {
        base,
        size: 0x1000,
        cmdline,
    }
}

fn cpu(n: u16) -> CpuId {
    CpuId::new(n).unwrap()
}

fn cpu_of(manager: &ChildManager, outcome: &BootOutcome) -> CpuId {
    manager.domain(outcome.result.unwrap()).unwrap().cpu
}

#[test]
fn cycler_wraps_around() {
    let set = CpuSet::EMPTY.with(cpu(1)).with(cpu(3)).with(cpu(4));
    let order: Vec<CpuId> = CpuCycler::new(set).take(5).collect();
    assert_eq!(order, vec![cpu(1), cpu(3), cpu(4), cpu(1), cpu(3)]);
}

#[test]
fn cycler_on_empty_set() {
    assert_eq!(CpuCycler::new(CpuSet::EMPTY).next(), None);
}

#[test]
fn waits_for_required_services() {
    let manager = manager(1);
    manager
        .register_root_service("log", CapSel::new(0x7_0000), CpuSet::first(1))
        .unwrap();
    let modules = [module(ROOT, "root"), module(A, "bin/a")];

    assert_eq!(start_children(&manager, &modules, 2), Err(Error::NotFound));
    assert_eq!(manager.occupied(), 0);
}

#[test]
fn first_module_is_skipped() {
    let manager = manager(1);
    with_required(&manager);
    let modules = [module(ROOT, "root"), module(A, "bin/a"), module(B, "bin/b")];

    let outcomes = start_children(&manager, &modules, 0).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].cmdline, "bin/a");
    assert_eq!(outcomes[1].cmdline, "bin/b");
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let names: Vec<String> = manager.domains().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn unpinned_modules_round_robin() {
    let manager = manager(2);
    with_required(&manager);
    let modules = [
        module(ROOT, "root"),
        module(A, "bin/a"),
        module(B, "bin/b cpu=0"),
        module(C, "bin/c"),
    ];

    let outcomes = start_children(&manager, &modules, 0).unwrap();
    assert_eq!(cpu_of(&manager, &outcomes[0]), cpu(0));
    assert_eq!(cpu_of(&manager, &outcomes[1]), cpu(0));
    // The pinned module did not advance the cycle
    assert_eq!(cpu_of(&manager, &outcomes[2]), cpu(1));
}

#[test]
fn lastmod_ends_the_list() {
    let manager = manager(1);
    with_required(&manager);
    let modules = [
        module(ROOT, "root"),
        module(A, "bin/a lastmod"),
        module(B, "bin/b"),
    ];

    let outcomes = start_children(&manager, &modules, 0).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(manager.domains().len(), 1);
}

#[test]
fn failed_module_is_skipped() {
    let manager = manager(1);
    with_required(&manager);
    let modules = [
        module(ROOT, "root"),
        module(BROKEN, "bin/broken"),
        module(A, "bin/a cpu=7"),
        module(B, "bin/b"),
    ];

    let outcomes = start_children(&manager, &modules, 0).unwrap();
    assert_eq!(outcomes[0].result, Err(Error::LoadError));
    assert_eq!(outcomes[1].result, Err(Error::InvalidArgs));
    let handle = outcomes[2].result.unwrap();
    assert_eq!(manager.state(handle), DomainState::Running);
}

#[test]
fn failed_lastmod_still_ends_the_list() {
    let manager = manager(1);
    with_required(&manager);
    let modules = [
        module(ROOT, "root"),
        module(BROKEN, "bin/broken lastmod"),
        module(A, "bin/a"),
    ];

    let outcomes = start_children(&manager, &modules, 0).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(manager.occupied(), 0);
}
