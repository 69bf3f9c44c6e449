// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Fixed-capacity domain table with generation-checked handles.
//!
//! A slot moves through `Vacant -> Reserved -> Live -> Retired -> Vacant`.
//! Only live slots resolve. A retired slot keeps its value until every
//! in-flight user is gone, and only then becomes vacant again. The
//! generation is bumped whenever a slot becomes vacant, so handles to a
//! previous occupant never resolve to the next one.

use alloc::vec::Vec;
use core::fmt;

use nre_abi::{DomainId, Word};

use crate::Error;

/// Generation-checked reference to a domain table slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainHandle {
    id: DomainId,
    generation: u32,
}

impl DomainHandle {
    /// Handle standing for the root task itself.
    ///
    /// Its index is outside every table, so it never resolves to a child.
    pub const ROOT: Self = Self {
        id: DomainId::new(u32::MAX),
        generation: 0,
    };

    /// Creates a handle.
    #[inline]
    #[must_use]
    pub const fn new(id: DomainId, generation: u32) -> Self {
        Self { id, generation }
    }

    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn id(self) -> DomainId {
        self.id
    }

    /// Returns the generation of the slot when the handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Returns true for [`DomainHandle::ROOT`].
    #[inline]
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.id.as_u32() == u32::MAX
    }
}

impl fmt::Debug for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainHandle({self})")
    }
}

impl fmt::Display for DomainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "root")
        } else {
            write!(f, "{}.{}", self.id.as_u32(), self.generation)
        }
    }
}

impl Word for DomainHandle {
    fn to_word(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.id.as_u32())
    }

    fn from_word(word: u64) -> Option<Self> {
        Some(Self {
            id: DomainId::new(word as u32),
            generation: (word >> 32) as u32,
        })
    }
}

/// Lifecycle state of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Free for the next domain.
    Vacant,
    /// Claimed by a domain that is still being built.
    Reserved,
    /// Holds a running domain.
    Live,
    /// Holds a dying domain that no longer resolves.
    Retired,
}

enum Entry<T> {
    Vacant,
    Reserved,
    Live(T),
    Retired(T),
}

struct Slot<T> {
    generation: u32,
    entry: Entry<T>,
}

/// Arena of domains indexed by [`DomainHandle`].
pub struct DomainTable<T> {
    slots: Vec<Slot<T>>,
}

impl<T> DomainTable<T> {
    /// Creates a table with `capacity` vacant slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot {
            generation: 0,
            entry: Entry::Vacant,
        });
        Self { slots }
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, handle: DomainHandle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.id.as_usize())
            .filter(|slot| slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: DomainHandle) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(handle.id.as_usize())
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Claims the lowest vacant slot.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityExceeded`] if every slot is in use.
    pub fn reserve(&mut self) -> Result<DomainHandle, Error> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| matches!(slot.entry, Entry::Vacant))
            .ok_or(Error::CapacityExceeded)?;
        let id = u32::try_from(index).map_err(|_| Error::CapacityExceeded)?;
        slot.entry = Entry::Reserved;
        Ok(DomainHandle::new(DomainId::new(id), slot.generation))
    }

    /// Makes a reserved slot live.
    pub fn publish(&mut self, handle: DomainHandle, value: T) -> Result<(), Error> {
        let slot = self.slot_mut(handle).ok_or(Error::NotFound)?;
        if !matches!(slot.entry, Entry::Reserved) {
            return Err(Error::NotFound);
        }
        slot.entry = Entry::Live(value);
        Ok(())
    }

    /// Returns the live value behind a handle.
    #[must_use]
    pub fn get(&self, handle: DomainHandle) -> Option<&T> {
        match self.slot(handle)?.entry {
            Entry::Live(ref value) => Some(value),
            _ => None,
        }
    }

    /// Returns the live value at a slot index, with its current handle.
    #[must_use]
    pub fn get_index(&self, id: DomainId) -> Option<(DomainHandle, &T)> {
        let slot = self.slots.get(id.as_usize())?;
        match slot.entry {
            Entry::Live(ref value) => Some((DomainHandle::new(id, slot.generation), value)),
            _ => None,
        }
    }

    /// Returns the state of the slot a handle refers to.
    ///
    /// A handle whose generation has passed refers to a vacated slot.
    #[must_use]
    pub fn state(&self, handle: DomainHandle) -> SlotState {
        match self.slot(handle).map(|slot| &slot.entry) {
            None | Some(Entry::Vacant) => SlotState::Vacant,
            Some(Entry::Reserved) => SlotState::Reserved,
            Some(Entry::Live(_)) => SlotState::Live,
            Some(Entry::Retired(_)) => SlotState::Retired,
        }
    }

    /// Stops a live slot from resolving.
    pub fn retire(&mut self, handle: DomainHandle) -> Result<(), Error> {
        let slot = self.slot_mut(handle).ok_or(Error::NotFound)?;
        match core::mem::replace(&mut slot.entry, Entry::Vacant) {
            Entry::Live(value) => {
                slot.entry = Entry::Retired(value);
                Ok(())
            }
            other => {
                slot.entry = other;
                Err(Error::NotFound)
            }
        }
    }

    /// Frees a reserved or retired slot for reuse.
    ///
    /// Returns the value a retired slot held.
    pub fn vacate(&mut self, handle: DomainHandle) -> Result<Option<T>, Error> {
        let slot = self.slot_mut(handle).ok_or(Error::NotFound)?;
        let value = match core::mem::replace(&mut slot.entry, Entry::Vacant) {
            Entry::Reserved => None,
            Entry::Retired(value) => Some(value),
            other => {
                slot.entry = other;
                return Err(Error::NotFound);
            }
        };
        slot.generation = slot.generation.wrapping_add(1);
        Ok(value)
    }

    /// Iterates over the live slots in index order.
    pub fn live(&self) -> impl Iterator<Item = (DomainHandle, &T)> + '_ {
        (0..self.slots.len()).filter_map(|index| {
            let id = DomainId::new(u32::try_from(index).ok()?);
            self.get_index(id)
        })
    }

    /// Returns the number of slots not vacant.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !matches!(slot.entry, Entry::Vacant))
            .count()
    }
}
