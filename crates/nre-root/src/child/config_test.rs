// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for manager and child configuration.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::config::*;
use crate::Error;
use nre_abi::{CapSel, CpuId, CpuSet};

// ============================================================================
// ChildConfig
// ============================================================================

#[test]
fn name_is_last_path_component() {
    let cfg = ChildConfig::parse("rom://bin/apps/console").unwrap();
    assert_eq!(cfg.name, "console");
    assert_eq!(cfg.cmdline, "rom://bin/apps/console");
    assert!(cfg.args.is_empty());
    assert_eq!(cfg.cpu, None);
    assert!(!cfg.last);
}

#[test]
fn options_are_recognised() {
    let cfg =
        ChildConfig::parse("bin/timer cpu=2 maxmem=4M provides=timer lastmod -v 100").unwrap();
    assert_eq!(cfg.name, "timer");
    assert_eq!(cfg.cpu, CpuId::new(2));
    assert_eq!(cfg.max_mem, Some(4 << 20));
    assert_eq!(cfg.provides.as_deref(), Some("timer"));
    assert!(cfg.last);
    assert_eq!(cfg.args, vec!["-v".to_string(), "100".to_string()]);
}

#[test]
fn size_suffixes() {
    let max = |s: &str| ChildConfig::parse(&format!("app maxmem={s}")).unwrap().max_mem;
    assert_eq!(max("4096"), Some(4096));
    assert_eq!(max("64k"), Some(64 << 10));
    assert_eq!(max("2G"), Some(2 << 30));
    assert_eq!(max("0x2000"), Some(0x2000));
}

#[test]
fn malformed_command_lines() {
    assert_eq!(ChildConfig::parse(""), Err(Error::InvalidArgs));
    assert_eq!(ChildConfig::parse("   "), Err(Error::InvalidArgs));
    assert_eq!(ChildConfig::parse("///"), Err(Error::InvalidArgs));
    assert_eq!(ChildConfig::parse("app cpu=x"), Err(Error::InvalidArgs));
    assert_eq!(ChildConfig::parse("app cpu=64"), Err(Error::InvalidArgs));
    assert_eq!(ChildConfig::parse("app maxmem=lots"), Err(Error::InvalidArgs));
    assert_eq!(
        ChildConfig::parse("app maxmem=99999999999999G"),
        Err(Error::InvalidArgs)
    );
    assert_eq!(ChildConfig::parse("app provides="), Err(Error::InvalidArgs));
}

// ============================================================================
// ManagerConfig
// ============================================================================

#[test]
fn default_config_is_valid() {
    let layout = ManagerConfig::default().validate().unwrap();
    assert_eq!(layout.max_domains(), u64::from(DEFAULT_MAX_DOMAINS));
    assert_eq!(layout.cpu_count(), 1);
    assert_eq!(layout.base(), CapSel::new(DEFAULT_PORTAL_BASE));
}

#[test]
fn with_cpus_enables_all() {
    let cfg = ManagerConfig::default().with_cpus(4);
    assert_eq!(cfg.cpus, CpuSet::first(4));
    assert_eq!(cfg.validate().unwrap().stride(), 32);
}

#[test]
fn enabled_cpu_beyond_count_rejected() {
    let cfg = ManagerConfig::default()
        .with_cpus(2)
        .with_enabled(CpuSet::single(CpuId::new(3).unwrap()));
    assert_eq!(cfg.validate(), Err(Error::InvalidArgs));

    let cfg = ManagerConfig::default().with_enabled(CpuSet::EMPTY);
    assert_eq!(cfg.validate(), Err(Error::InvalidArgs));
}

#[test]
fn overlapping_selector_ranges_rejected() {
    // Portal area of 32 domains * 8 selectors starting at 0x1000
    let cfg = ManagerConfig::default()
        .with_portal_base(CapSel::new(0x1000))
        .with_object_selectors(CapSel::new(0x1080), CapSel::new(0x2000));
    assert_eq!(cfg.validate(), Err(Error::InvalidArgs));

    let cfg = ManagerConfig::default()
        .with_portal_base(CapSel::new(0x1000))
        .with_object_selectors(CapSel::new(0x1100), CapSel::new(0x2000));
    assert!(cfg.validate().is_ok());
}

#[test]
fn unaligned_child_vspace_rejected() {
    let cfg = ManagerConfig::default().with_child_vspace(0x1800, 0x10_0000);
    assert_eq!(cfg.validate(), Err(Error::InvalidArgs));
    let cfg = ManagerConfig::default().with_child_vspace(0x10_0000, 0x1000);
    assert_eq!(cfg.validate(), Err(Error::InvalidArgs));
}
