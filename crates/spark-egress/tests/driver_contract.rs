//! 写完成驱动器契约：任意部分写序列、对端关闭与 I/O 失败下，完成信号恰好一次、缓冲恰好回收一次。

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use proptest::prelude::*;
use spark_buffer::SlabBufferPool;
use spark_egress::{CompletionToken, Drive, drain_and_complete, write_then_complete};
use spark_transport::{ScriptedChannel, ScriptedFlush, ScriptedWrite, SinkChannel};
use tracing_test::traced_test;

fn counting() -> (CompletionToken, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&count);
    let token = CompletionToken::new(move || {
        observed.fetch_add(1, Ordering::SeqCst);
    });
    (token, count)
}

fn write_response() -> impl Strategy<Value = ScriptedWrite> {
    prop_oneof![
        3 => (0usize..8).prop_map(ScriptedWrite::Accept),
        1 => Just(ScriptedWrite::WouldBlock),
    ]
}

proptest! {
    #[test]
    fn trickling_channel_completes_once_and_frees_once(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        writes in proptest::collection::vec(write_response(), 0..64),
        flush_blocks in 0usize..3,
    ) {
        let pool = SlabBufferPool::new();
        let mut channel = ScriptedChannel::new()
            .with_writes(writes)
            .with_flushes(std::iter::repeat_n(ScriptedFlush::WouldBlock, flush_blocks));
        let (completion, count) = counting();

        let _ = write_then_complete(pool.acquire_with(&payload), &mut channel, completion);
        channel.run_until_idle(1_000);

        prop_assert_eq!(count.load(Ordering::SeqCst), 1);
        prop_assert_eq!(channel.written(), &payload[..]);
        prop_assert!(channel.is_write_shutdown());
        prop_assert!(!channel.has_listener());
        let stats = pool.statistics();
        prop_assert_eq!(stats.freed, 1);
        prop_assert_eq!(stats.discarded, 0);
        prop_assert_eq!(stats.active_leases, 0);
    }
}

#[test]
fn empty_buffer_is_freed_and_drained_without_writing() {
    let pool = SlabBufferPool::new();
    let mut channel = ScriptedChannel::new();
    let (completion, count) = counting();

    let drive = write_then_complete(pool.acquire_with(b""), &mut channel, completion);

    assert_eq!(drive, Drive::Completed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(channel.stats().write_calls, 0);
    assert_eq!(pool.statistics().freed, 1);
}

#[test]
fn resumed_write_continues_from_pending_offset() {
    let pool = SlabBufferPool::new();
    let mut channel = ScriptedChannel::new().with_writes([
        ScriptedWrite::Accept(4),
        ScriptedWrite::WouldBlock,
        ScriptedWrite::Accept(3),
        ScriptedWrite::WouldBlock,
    ]);
    let (completion, count) = counting();

    let drive = write_then_complete(pool.acquire_with(b"0123456789"), &mut channel, completion);
    assert_eq!(drive, Drive::Suspended);
    assert_eq!(channel.written(), b"0123");
    assert!(channel.is_write_resumed());

    assert!(channel.fire_writable());
    assert_eq!(channel.written(), b"0123456");
    assert_eq!(count.load(Ordering::SeqCst), 0);

    assert!(channel.fire_writable());
    assert_eq!(channel.written(), b"0123456789");
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!channel.is_write_resumed(), "完成前应关闭写关注");
    assert_eq!(pool.statistics().freed, 1);
}

#[test]
fn peer_close_mid_write_completes_without_further_writes() {
    let pool = SlabBufferPool::new();
    let mut channel =
        ScriptedChannel::new().with_writes([ScriptedWrite::Accept(3), ScriptedWrite::Closed]);
    let (completion, count) = counting();

    let drive = write_then_complete(pool.acquire_with(b"hello world"), &mut channel, completion);

    assert_eq!(drive, Drive::Completed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(channel.written(), b"hel");
    let stats = channel.stats();
    assert_eq!(stats.write_calls, 2);
    assert_eq!(stats.close_calls, 1);
    assert_eq!(stats.calls_after_close, 0);
    assert_eq!(pool.statistics().discarded, 1);
    assert_eq!(pool.statistics().freed, 0);
}

#[test]
fn suspended_write_woken_on_closed_channel_short_circuits() {
    let pool = SlabBufferPool::new();
    let mut channel =
        ScriptedChannel::new().with_writes([ScriptedWrite::Accept(2), ScriptedWrite::WouldBlock]);
    let (completion, count) = counting();

    let drive = write_then_complete(pool.acquire_with(b"abcdef"), &mut channel, completion);
    assert_eq!(drive, Drive::Suspended);

    channel.disconnect();
    assert!(channel.fire_writable());

    assert_eq!(count.load(Ordering::SeqCst), 1);
    let stats = channel.stats();
    assert_eq!(stats.write_calls, 2);
    assert_eq!(stats.calls_after_close, 0);
    assert_eq!(pool.statistics().discarded, 1);
}

#[test]
fn write_failure_force_closes_and_completes() {
    let pool = SlabBufferPool::new();
    let mut channel = ScriptedChannel::new()
        .with_writes([ScriptedWrite::Fail(io::ErrorKind::ConnectionReset)]);
    let (completion, count) = counting();

    let drive = write_then_complete(pool.acquire_with(b"payload"), &mut channel, completion);

    assert_eq!(drive, Drive::Completed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!channel.is_open());
    assert_eq!(pool.statistics().discarded, 1);
}

#[traced_test]
#[test]
fn flush_failure_swallows_close_error_and_completes() {
    let mut channel = ScriptedChannel::new()
        .with_flushes([ScriptedFlush::Fail(io::ErrorKind::Other)])
        .failing_close();
    let (completion, count) = counting();

    let drive = drain_and_complete(&mut channel, completion);

    assert_eq!(drive, Drive::Completed);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(channel.stats().close_calls, 1);
    assert!(logs_contain("shutdown or flush failed"));
    assert!(logs_contain("ignored error while force-closing channel"));
}

#[test]
fn resumed_flush_failure_completes_once() {
    let mut channel = ScriptedChannel::new().with_flushes([
        ScriptedFlush::WouldBlock,
        ScriptedFlush::WouldBlock,
        ScriptedFlush::Fail(io::ErrorKind::BrokenPipe),
    ]);
    let (completion, count) = counting();

    assert_eq!(drain_and_complete(&mut channel, completion), Drive::Suspended);
    assert!(channel.fire_writable());
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(channel.has_listener());

    assert!(channel.fire_writable());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!channel.is_open());
    assert!(!channel.fire_writable());
}
