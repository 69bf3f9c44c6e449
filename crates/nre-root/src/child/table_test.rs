// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the domain table.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::table::*;
use crate::Error;
use nre_abi::{DomainId, Word};

fn live(table: &mut DomainTable<&'static str>, value: &'static str) -> DomainHandle {
    let handle = table.reserve().unwrap();
    table.publish(handle, value).unwrap();
    handle
}

#[test]
fn reserve_takes_lowest_vacant() {
    let mut table = DomainTable::new(3);
    let a = live(&mut table, "a");
    let b = live(&mut table, "b");
    assert_eq!(a.id(), DomainId::new(0));
    assert_eq!(b.id(), DomainId::new(1));

    table.retire(a).unwrap();
    table.vacate(a).unwrap();
    let c = live(&mut table, "c");
    assert_eq!(c.id(), DomainId::new(0));
    assert_ne!(c, a);
}

#[test]
fn full_table_rejects_reserve() {
    let mut table: DomainTable<&str> = DomainTable::new(2);
    table.reserve().unwrap();
    table.reserve().unwrap();
    assert_eq!(table.reserve(), Err(Error::CapacityExceeded));
    assert_eq!(table.occupied(), 2);
}

#[test]
fn reserved_slot_does_not_resolve() {
    let mut table: DomainTable<&str> = DomainTable::new(1);
    let handle = table.reserve().unwrap();
    assert_eq!(table.get(handle), None);
    assert_eq!(table.state(handle), SlotState::Reserved);
    assert!(table.live().next().is_none());
}

#[test]
fn retired_slot_is_neither_resolvable_nor_reusable() {
    let mut table = DomainTable::new(1);
    let handle = live(&mut table, "a");
    table.retire(handle).unwrap();

    assert_eq!(table.get(handle), None);
    assert_eq!(table.get_index(handle.id()), None);
    assert_eq!(table.state(handle), SlotState::Retired);
    assert_eq!(table.reserve(), Err(Error::CapacityExceeded));

    assert_eq!(table.vacate(handle).unwrap(), Some("a"));
    assert_eq!(table.state(handle), SlotState::Vacant);
    assert!(table.reserve().is_ok());
}

#[test]
fn stale_handle_never_resolves_new_occupant() {
    let mut table = DomainTable::new(1);
    let old = live(&mut table, "old");
    table.retire(old).unwrap();
    table.vacate(old).unwrap();
    let new = live(&mut table, "new");

    assert_eq!(old.id(), new.id());
    assert_eq!(table.get(old), None);
    assert_eq!(table.get(new), Some(&"new"));
    assert_eq!(table.retire(old), Err(Error::NotFound));
    assert_eq!(table.vacate(old), Err(Error::NotFound));
}

#[test]
fn retire_twice_fails() {
    let mut table = DomainTable::new(1);
    let handle = live(&mut table, "a");
    table.retire(handle).unwrap();
    assert_eq!(table.retire(handle), Err(Error::NotFound));
}

#[test]
fn live_slot_cannot_be_vacated() {
    let mut table = DomainTable::new(1);
    let handle = live(&mut table, "a");
    assert_eq!(table.vacate(handle), Err(Error::NotFound));
    assert_eq!(table.get(handle), Some(&"a"));
}

#[test]
fn live_iterates_in_index_order() {
    let mut table = DomainTable::new(4);
    let a = live(&mut table, "a");
    live(&mut table, "b");
    live(&mut table, "c");
    table.retire(a).unwrap();

    let names: Vec<&str> = table.live().map(|(_, v)| *v).collect();
    assert_eq!(names, vec!["b", "c"]);
}

#[test]
fn handle_word_encoding() {
    let handle = DomainHandle::new(DomainId::new(5), 9);
    assert_eq!(DomainHandle::from_word(handle.to_word()), Some(handle));
    assert_eq!(handle.to_string(), "5.9");
    assert_eq!(DomainHandle::ROOT.to_string(), "root");
    assert!(DomainHandle::ROOT.is_root());
}
