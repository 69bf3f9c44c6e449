// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Message frame transferred by a portal call.
//!
//! The frame models the kernel's per-thread message buffer: an untyped area
//! of little-endian words and a short list of typed items. Strings are
//! encoded as a length word followed by their bytes, padded to a word
//! boundary.

use super::{FrameError, ResultCode, Word};
use crate::types::CapSel;

/// Size of the untyped area in bytes.
pub const FRAME_BYTES: usize = 512;

/// Maximum number of typed items per frame.
pub const MAX_TYPED: usize = 8;

/// Word size in bytes.
const WORD: usize = 8;

/// A capability transfer attached to a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypedItem {
    /// Selector transferred by value into the receiver's space.
    Delegate(CapSel),
    /// Selector mapped into the receiver's space without copy semantics.
    Translate(CapSel),
}

/// Message frame of a portal call.
#[derive(Clone)]
pub struct UtcbFrame {
    /// Untyped payload.
    data: [u8; FRAME_BYTES],
    /// Bytes written to `data`.
    len: usize,
    /// Typed items.
    typed: [Option<TypedItem>; MAX_TYPED],
    /// Number of valid typed items.
    typed_len: usize,
}

impl UtcbFrame {
    /// Creates an empty frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: [0; FRAME_BYTES],
            len: 0,
            typed: [None; MAX_TYPED],
            typed_len: 0,
        }
    }

    /// Discards all untyped words and typed items.
    ///
    /// Handlers must call this before writing a reply, including on error
    /// paths, so that no unread input leaks into the reply.
    pub const fn clear(&mut self) {
        self.len = 0;
        self.typed_len = 0;
    }

    /// Returns the number of untyped bytes written.
    #[inline]
    #[must_use]
    pub const fn untyped_len(&self) -> usize {
        self.len
    }

    /// Returns the number of typed items attached.
    #[inline]
    #[must_use]
    pub const fn typed_len(&self) -> usize {
        self.typed_len
    }

    /// Returns true if the frame carries nothing.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0 && self.typed_len == 0
    }

    /// Appends a raw word.
    pub fn push_u64(&mut self, word: u64) -> Result<(), FrameError> {
        let end = self.len.checked_add(WORD).ok_or(FrameError::Overflow)?;
        let slot = self
            .data
            .get_mut(self.len..end)
            .ok_or(FrameError::Overflow)?;
        slot.copy_from_slice(&word.to_le_bytes());
        self.len = end;
        Ok(())
    }

    /// Appends a value encoded as one word.
    pub fn push<T: Word>(&mut self, value: T) -> Result<(), FrameError> {
        self.push_u64(value.to_word())
    }

    /// Appends a string (length word, bytes, padding).
    pub fn push_str(&mut self, s: &str) -> Result<(), FrameError> {
        let bytes = s.as_bytes();
        let padded = bytes.len().div_ceil(WORD) * WORD;
        let needed = padded.checked_add(WORD).ok_or(FrameError::Overflow)?;
        if self.len + needed > FRAME_BYTES {
            return Err(FrameError::Overflow);
        }
        self.push_u64(bytes.len() as u64)?;
        let start = self.len;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.data[start + bytes.len()..start + padded].fill(0);
        self.len = start + padded;
        Ok(())
    }

    /// Attaches a selector to be delegated to the receiver.
    pub fn delegate(&mut self, sel: CapSel) -> Result<(), FrameError> {
        self.push_item(TypedItem::Delegate(sel))
    }

    /// Attaches a selector to be translated into the receiver's space.
    pub fn translate(&mut self, sel: CapSel) -> Result<(), FrameError> {
        self.push_item(TypedItem::Translate(sel))
    }

    fn push_item(&mut self, item: TypedItem) -> Result<(), FrameError> {
        let slot = self
            .typed
            .get_mut(self.typed_len)
            .ok_or(FrameError::TooManyItems)?;
        *slot = Some(item);
        self.typed_len += 1;
        Ok(())
    }

    /// Replaces the frame content with a bare result code.
    pub fn reply(&mut self, code: ResultCode) {
        self.clear();
        // An empty frame always has room for one word
        let _ = self.push(code);
    }

    /// Returns a reader positioned at the first word.
    #[must_use]
    pub const fn reader(&self) -> FrameReader<'_> {
        FrameReader {
            frame: self,
            pos: 0,
        }
    }

    /// Reads the result code of a reply.
    ///
    /// Returns a reader positioned after the code on success, or the error
    /// code itself.
    pub fn result(&self) -> Result<FrameReader<'_>, ResultCode> {
        let mut reader = self.reader();
        match reader.pop::<ResultCode>() {
            Ok(ResultCode::Success) => Ok(reader),
            Ok(code) => Err(code),
            Err(_) => Err(ResultCode::InvalidArgs),
        }
    }
}

impl Default for UtcbFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for UtcbFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UtcbFrame")
            .field("untyped_bytes", &self.len)
            .field("typed", &&self.typed[..self.typed_len])
            .finish()
    }
}

/// Cursor over the input of a [`UtcbFrame`].
///
/// Reading never mutates the frame, so string fields can be borrowed for
/// as long as the reader's frame lives.
#[derive(Clone, Debug)]
pub struct FrameReader<'a> {
    frame: &'a UtcbFrame,
    pos: usize,
}

impl<'a> FrameReader<'a> {
    /// Reads the next raw word.
    pub fn pop_u64(&mut self) -> Result<u64, FrameError> {
        let end = self.pos.checked_add(WORD).ok_or(FrameError::Underflow)?;
        if end > self.frame.len {
            return Err(FrameError::Underflow);
        }
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.frame.data[self.pos..end]);
        self.pos = end;
        Ok(u64::from_le_bytes(word))
    }

    /// Reads the next word as `T`.
    pub fn pop<T: Word>(&mut self) -> Result<T, FrameError> {
        let word = self.pop_u64()?;
        T::from_word(word).ok_or(FrameError::InvalidValue)
    }

    /// Reads the next string field.
    pub fn pop_str(&mut self) -> Result<&'a str, FrameError> {
        let len = usize::try_from(self.pop_u64()?).map_err(|_| FrameError::Underflow)?;
        let frame = self.frame;
        // The length word is client-controlled; bound it before any arithmetic.
        if len > frame.len - self.pos {
            return Err(FrameError::Underflow);
        }
        let padded = len
            .div_ceil(WORD)
            .checked_mul(WORD)
            .ok_or(FrameError::Underflow)?;
        let end = self.pos.checked_add(padded).ok_or(FrameError::Underflow)?;
        if end > frame.len {
            return Err(FrameError::Underflow);
        }
        let bytes = &frame.data[self.pos..self.pos + len];
        self.pos = end;
        core::str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Returns the `n`-th delegated selector.
    pub fn delegated(&self, n: usize) -> Result<CapSel, FrameError> {
        self.items()
            .filter_map(|item| match item {
                TypedItem::Delegate(sel) => Some(sel),
                TypedItem::Translate(_) => None,
            })
            .nth(n)
            .ok_or(FrameError::MissingItem)
    }

    /// Returns the `n`-th translated selector.
    pub fn translated(&self, n: usize) -> Result<CapSel, FrameError> {
        self.items()
            .filter_map(|item| match item {
                TypedItem::Translate(sel) => Some(sel),
                TypedItem::Delegate(_) => None,
            })
            .nth(n)
            .ok_or(FrameError::MissingItem)
    }

    fn items(&self) -> impl Iterator<Item = TypedItem> + 'a {
        let frame = self.frame;
        frame.typed[..frame.typed_len].iter().flatten().copied()
    }

    /// Returns the number of unread untyped bytes.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.frame.len - self.pos
    }

    /// Ends input processing, discarding unread fields.
    ///
    /// Returns the number of discarded bytes so callers can log sloppy
    /// clients.
    #[must_use]
    pub const fn finish(self) -> usize {
        self.remaining()
    }
}
