//! コールスタックのウォークとキャッシュのテスト

mod common;

use common::{fixture, FakeMemory, FakeSymbols, FakeThread, RepeatingUnwinder};
use kasane_core::{ThreadContext, WORD_SIZE};
use std::sync::Arc;

const STACK: u64 = 0x7ff0_0000;
const CODE: u64 = 0x40_0000;

fn context() -> ThreadContext {
    ThreadContext {
        instruction_pointer: CODE + 0x10,
        stack_pointer: STACK + 0xf0,
        frame_pointer: STACK + 0x100,
    }
}

/// inner -> middle -> outer の3フレームを持つスタック
fn three_frames() -> (FakeMemory, FakeSymbols) {
    let mut memory = FakeMemory::new();
    memory.map(STACK, 0x1000);
    memory.map(CODE, 0x1000);
    memory.write_word(STACK + 0x100, STACK + 0x200);
    memory.write_word(STACK + 0x108, CODE + 0x40);
    memory.write_word(STACK + 0x200, 0);
    memory.write_word(STACK + 0x208, CODE + 0x80);

    let symbols = FakeSymbols::new()
        .module(CODE, 0x1000, "app")
        .label(CODE + 0x10, "inner")
        .label(CODE + 0x40, "middle")
        .label(CODE + 0x80, "outer");
    (memory, symbols)
}

#[test]
fn test_fresh_walk_builds_entries() {
    let (memory, symbols) = three_frames();
    let f = fixture(memory, symbols, FakeThread::with_context(context()), None);

    let stack = f.session.get_call_stack(STACK + 0xf0, false);
    assert_eq!(stack.len(), 3);

    let entries = stack.entries();
    assert_eq!(entries[0].address, STACK + 0x100 + WORD_SIZE);
    assert_eq!(entries[0].from, CODE + 0x10);
    assert_eq!(entries[0].to, CODE + 0x40);
    assert_eq!(entries[0].comment, "return to app.middle from app.inner");

    assert_eq!(entries[1].address, STACK + 0x208);
    assert_eq!(entries[1].comment, "return to app.outer from app.middle");

    assert_eq!(entries[2].from, CODE + 0x80);
    assert_eq!(entries[2].to, 0);
    assert_eq!(entries[2].comment, "return to ??? from app.outer");

    // 呼び出し元ほど深い位置にある
    assert!(entries[0].address < entries[1].address);

    // スレッドは一度だけ停止・再開される
    assert_eq!(f.thread.suspends(), 1);
    assert_eq!(f.thread.resumes(), 1);
}

#[test]
fn test_cached_lookup_does_not_walk() {
    let (memory, symbols) = three_frames();
    let f = fixture(memory, symbols, FakeThread::with_context(context()), None);

    let stack = f.session.get_call_stack(STACK + 0xf0, true);
    assert!(stack.is_empty());
    assert_eq!(f.thread.suspends(), 0);

    let walked = f.session.get_call_stack(STACK + 0xf0, false);
    let cached = f.session.get_call_stack(STACK + 0xf0, true);
    assert_eq!(walked, cached);
    assert_eq!(cached.total(), 3);
    assert_eq!(f.thread.suspends(), 1);
}

#[test]
fn test_refresh_call_stack_populates_cache() {
    let (memory, symbols) = three_frames();
    let f = fixture(memory, symbols, FakeThread::with_context(context()), None);

    f.session.on_debug_stop(STACK + 0xf0);
    assert_eq!(f.session.cached_call_stacks(), 1);
    assert_eq!(f.session.get_call_stack(STACK + 0xf0, true).len(), 3);

    f.session.reset();
    assert_eq!(f.session.cached_call_stacks(), 0);
    assert!(f.session.get_call_stack(STACK + 0xf0, true).is_empty());
}

#[test]
fn test_walk_is_capped_at_fifty_frames() {
    let (memory, symbols) = three_frames();
    let unwinder = Arc::new(RepeatingUnwinder { pc: CODE + 0x10 });
    let f = fixture(
        memory,
        symbols,
        FakeThread::with_context(context()),
        Some(unwinder),
    );

    let stack = f.session.get_call_stack(STACK, false);
    assert_eq!(stack.len(), 50);
}

#[test]
fn test_suspend_failure_yields_empty_stack() {
    let (memory, symbols) = three_frames();
    let thread = FakeThread {
        fail_suspend: true,
        ..FakeThread::with_context(context())
    };
    let f = fixture(memory, symbols, thread, None);

    assert!(f.session.get_call_stack(STACK + 0xf0, false).is_empty());
    assert_eq!(f.thread.resumes(), 0);
    assert_eq!(f.session.cached_call_stacks(), 0);
}

#[test]
fn test_context_failure_still_resumes_thread() {
    let (memory, symbols) = three_frames();
    let thread = FakeThread {
        fail_context: true,
        ..FakeThread::with_context(context())
    };
    let f = fixture(memory, symbols, thread, None);

    assert!(f.session.get_call_stack(STACK + 0xf0, false).is_empty());
    assert_eq!(f.thread.suspends(), 1);
    assert_eq!(f.thread.resumes(), 1);
}

#[test]
fn test_unreadable_frame_base_gives_partial_stack() {
    let (memory, symbols) = three_frames();
    let broken = ThreadContext {
        frame_pointer: 0xdead_0000,
        ..context()
    };
    let f = fixture(memory, symbols, FakeThread::with_context(broken), None);

    let stack = f.session.get_call_stack(STACK, false);
    assert_eq!(stack.len(), 1);
    assert_eq!(stack.entries()[0].from, CODE + 0x10);
    assert_eq!(stack.entries()[0].to, 0);
}

#[test]
fn test_frame_pointer_near_address_space_end() {
    let (memory, symbols) = three_frames();
    let garbage = ThreadContext {
        frame_pointer: u64::MAX - 3,
        ..context()
    };
    let f = fixture(memory, symbols, FakeThread::with_context(garbage), None);

    let stack = f.session.get_call_stack(STACK, false);
    assert_eq!(stack.len(), 1);
    assert_eq!(stack.entries()[0].from, CODE + 0x10);
    assert_eq!(stack.entries()[0].to, 0);
    assert_eq!(stack.entries()[0].comment, "return to ??? from app.inner");
    assert_eq!(f.thread.resumes(), 1);
}

#[test]
fn test_twenty_first_key_flushes_session_cache() {
    let (memory, symbols) = three_frames();
    let f = fixture(memory, symbols, FakeThread::with_context(context()), None);

    for i in 0..20 {
        f.session.refresh_call_stack(STACK + i * WORD_SIZE);
    }
    assert_eq!(f.session.cached_call_stacks(), 20);

    f.session.refresh_call_stack(STACK + 0x800);
    assert_eq!(f.session.cached_call_stacks(), 1);
    assert!(!f.session.get_call_stack(STACK + 0x800, true).is_empty());
    assert!(f.session.get_call_stack(STACK, true).is_empty());
}
