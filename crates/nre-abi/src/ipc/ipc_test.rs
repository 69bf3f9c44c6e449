// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Tests for the portal call wire format.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

#[test]
fn service_command_values() {
    assert_eq!(ServiceCommand::from_u64(1), Some(ServiceCommand::Register));
    assert_eq!(ServiceCommand::from_u64(4), Some(ServiceCommand::Unregister));
    assert!(ServiceCommand::from_u64(0).is_none());
    assert!(ServiceCommand::from_u64(5).is_none());
}

#[test]
fn result_code_values() {
    assert!(ResultCode::Success.is_success());
    assert!(!ResultCode::NotFound.is_success());
    assert_eq!(ResultCode::from_u64(7), Some(ResultCode::OutOfRange));
    assert!(ResultCode::from_u64(10).is_none());
    assert!(ResultCode::from_u64(u64::MAX).is_none());
}

#[test]
fn register_request_layout() {
    let mut frame = UtcbFrame::new();
    frame.push(ServiceCommand::Register).unwrap();
    frame.push_str("console").unwrap();
    frame.push(CpuSet::from_bits(0b101)).unwrap();
    frame.translate(CapSel::new(0x400)).unwrap();

    // tag + (len + 8 bytes of "console" padded) + cpuset
    assert_eq!(frame.untyped_len(), 8 + 8 + 8 + 8);
    assert_eq!(frame.typed_len(), 1);

    let mut input = frame.reader();
    assert_eq!(input.pop::<ServiceCommand>().unwrap(), ServiceCommand::Register);
    assert_eq!(input.pop_str().unwrap(), "console");
    assert_eq!(input.pop::<CpuSet>().unwrap(), CpuSet::from_bits(0b101));
    assert_eq!(input.translated(0).unwrap(), CapSel::new(0x400));
    assert_eq!(input.delegated(0), Err(FrameError::MissingItem));
    assert_eq!(input.finish(), 0);
}

#[test]
fn empty_string_field() {
    let mut frame = UtcbFrame::new();
    frame.push_str("").unwrap();
    frame.push_u64(42).unwrap();
    let mut input = frame.reader();
    assert_eq!(input.pop_str().unwrap(), "");
    assert_eq!(input.pop_u64().unwrap(), 42);
}

#[test]
fn reading_past_end_fails() {
    let mut frame = UtcbFrame::new();
    frame.push_u64(1).unwrap();
    let mut input = frame.reader();
    assert_eq!(input.pop_u64().unwrap(), 1);
    assert_eq!(input.pop_u64(), Err(FrameError::Underflow));
    assert_eq!(input.pop_str(), Err(FrameError::Underflow));
}

#[test]
fn truncated_string_fails() {
    let mut frame = UtcbFrame::new();
    // Claims 100 bytes but carries none
    frame.push_u64(100).unwrap();
    assert_eq!(frame.reader().pop_str(), Err(FrameError::Underflow));
}

#[test]
fn huge_string_length_fails() {
    for len in [u64::MAX, u64::MAX - 7, 1 << 63] {
        let mut frame = UtcbFrame::new();
        frame.push_u64(len).unwrap();
        frame.push_u64(0).unwrap();
        assert_eq!(frame.reader().pop_str(), Err(FrameError::Underflow));
    }
}

#[test]
fn invalid_value_fails() {
    let mut frame = UtcbFrame::new();
    frame.push_u64(99).unwrap();
    assert_eq!(
        frame.reader().pop::<ServiceCommand>(),
        Err(FrameError::InvalidValue)
    );
}

#[test]
fn frame_overflow() {
    let mut frame = UtcbFrame::new();
    for i in 0..(FRAME_BYTES / 8) {
        frame.push_u64(i as u64).unwrap();
    }
    assert_eq!(frame.push_u64(0), Err(FrameError::Overflow));
    frame.clear();
    assert!(frame.is_empty());
    frame.push_u64(0).unwrap();
}

#[test]
fn string_too_long() {
    let long = [b'x'; FRAME_BYTES];
    let s = core::str::from_utf8(&long).unwrap();
    let mut frame = UtcbFrame::new();
    assert_eq!(frame.push_str(s), Err(FrameError::Overflow));
    assert!(frame.is_empty());
}

#[test]
fn typed_item_limit() {
    let mut frame = UtcbFrame::new();
    for i in 0..MAX_TYPED {
        frame.delegate(CapSel::new(i as u64)).unwrap();
    }
    assert_eq!(frame.translate(CapSel::new(0)), Err(FrameError::TooManyItems));
}

#[test]
fn unread_input_is_discarded_by_reply() {
    let mut frame = UtcbFrame::new();
    frame.push(ServiceCommand::OpenSession).unwrap();
    frame.push_str("log").unwrap();
    frame.push_str("unused args").unwrap();
    frame.delegate(CapSel::new(5)).unwrap();

    let mut input = frame.reader();
    let _ = input.pop::<ServiceCommand>().unwrap();
    assert!(input.finish() > 0);

    frame.reply(ResultCode::NotFound);
    assert_eq!(frame.typed_len(), 0);
    assert_eq!(frame.untyped_len(), 8);
    assert_eq!(frame.result().unwrap_err(), ResultCode::NotFound);
}

#[test]
fn success_reply_fields() {
    let mut frame = UtcbFrame::new();
    frame.reply(ResultCode::Success);
    frame.push(SessionId::new(3)).unwrap();
    frame.delegate(CapSel::new(0x800)).unwrap();

    let mut reply = frame.result().unwrap();
    assert_eq!(reply.pop::<SessionId>().unwrap(), SessionId::new(3));
    assert_eq!(reply.delegated(0).unwrap(), CapSel::new(0x800));
}

#[test]
fn nth_typed_item_by_kind() {
    let mut frame = UtcbFrame::new();
    frame.delegate(CapSel::new(1)).unwrap();
    frame.translate(CapSel::new(2)).unwrap();
    frame.delegate(CapSel::new(3)).unwrap();
    let input = frame.reader();
    assert_eq!(input.delegated(1).unwrap(), CapSel::new(3));
    assert_eq!(input.translated(0).unwrap(), CapSel::new(2));
    assert_eq!(input.translated(1), Err(FrameError::MissingItem));
}
