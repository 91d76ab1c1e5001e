//! 写完成驱动器。
//!
//! # 教案式综述
//! - **意图 (Why)**：响应体或帧的最后一段数据写出后，还需半关闭、刷新并通知完成；任何一步都可能
//!   遇到背压、对端关闭或 I/O 失败。驱动器把这些出口收敛为“完成信号恰好触发一次”；
//! - **逻辑 (How)**：
//!   - [`drain_and_complete`]：半关闭 → 刷新；刷新未完成时登记 [`WriteTask::Flush`] 并开启写关注；
//!   - [`write_then_complete`]：循环写出缓冲剩余字节；遇到背压时把缓冲连同完成令牌一起封进
//!     [`WriteTask::Write`]，被唤醒后从原偏移继续；
//!   - 挂起的任务被唤醒时若发现通道已关闭，直接完成而不再触碰通道；
//! - **契约 (What)**：
//!   - 完成令牌在每条出口上恰好被消费一次；
//!   - 缓冲只在排空路径上被 `free`，关闭/失败路径上随任务一同丢弃；
//!   - I/O 失败与对端关闭都会强制关闭通道，关闭过程中的二次错误被吞掉；
//! - **风险提示 (Trade-offs)**：恢复后的刷新成功会先关闭写关注再完成，避免回调里发起的新操作
//!   开启的写关注被随后的 `suspend_writes` 覆盖。

use std::io;

use bytes::Buf;
use spark_buffer::PooledBuffer;
use spark_transport::{FlushStatus, SinkChannel, WriteReadyListener, WriteStatus, safe_close};

use crate::completion::CompletionToken;

/// 一次驱动调用的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum Drive {
    /// 完成信号已在本次调用中触发。
    Completed,
    /// 操作已登记为写就绪任务，等待 Reactor 唤醒。
    Suspended,
}

/// 挂起的出站写操作。
///
/// 任务捕获继续执行所需的全部状态：`Write` 持有尚未排空的缓冲（读指针即剩余偏移），
/// `Flush` 只需等待刷新完成。两者都持有完成令牌。
pub enum WriteTask {
    Flush {
        completion: CompletionToken,
    },
    Write {
        buffer: PooledBuffer,
        completion: CompletionToken,
    },
}

impl WriteReadyListener for WriteTask {
    fn on_write_ready(self: Box<Self>, channel: &mut dyn SinkChannel) {
        let (buffer, completion) = match *self {
            WriteTask::Flush { completion } => (None, completion),
            WriteTask::Write { buffer, completion } => (Some(buffer), completion),
        };
        if !channel.is_open() {
            tracing::debug!(
                remaining = buffer.as_ref().map_or(0, PooledBuffer::remaining_bytes),
                "channel closed while write was suspended"
            );
            drop(buffer);
            signal(completion);
            return;
        }
        match buffer {
            Some(buffer) => {
                let _ = write_loop(buffer, channel, completion, true);
            }
            None => resume_flush(channel, completion),
        }
    }
}

/// 半关闭并刷新通道，完成后触发 `completion`。
///
/// 刷新未完成时登记刷新任务并开启写关注，返回 [`Drive::Suspended`]；
/// 半关闭或刷新失败时强制关闭通道并立即完成。
pub fn drain_and_complete(channel: &mut dyn SinkChannel, completion: CompletionToken) -> Drive {
    drain(channel, completion, false)
}

/// 写出 `buffer` 的全部剩余字节，随后执行 [`drain_and_complete`]。
///
/// # 出口
/// - 缓冲排空：`free` 缓冲，转入半关闭与刷新；
/// - 通道返回 `WouldBlock` 或 0 字节：登记写任务并开启写关注，唤醒后从原偏移继续；
/// - 对端关闭：强制关闭通道并直接完成，不再尝试写入；
/// - I/O 失败：强制关闭通道并完成。
pub fn write_then_complete(
    buffer: PooledBuffer,
    channel: &mut dyn SinkChannel,
    completion: CompletionToken,
) -> Drive {
    write_loop(buffer, channel, completion, false)
}

fn write_loop(
    mut buffer: PooledBuffer,
    channel: &mut dyn SinkChannel,
    completion: CompletionToken,
    resumed: bool,
) -> Drive {
    loop {
        if !buffer.has_remaining_bytes() {
            buffer.free();
            return drain(channel, completion, resumed);
        }
        match channel.write(buffer.chunk()) {
            Ok(WriteStatus::Written(written)) if written > 0 => buffer.advance(written),
            Ok(WriteStatus::Written(_) | WriteStatus::WouldBlock) => {
                tracing::debug!(
                    remaining = buffer.remaining_bytes(),
                    "write would block, suspending until writable"
                );
                channel.set_write_listener(Box::new(WriteTask::Write { buffer, completion }));
                channel.resume_writes();
                return Drive::Suspended;
            }
            Ok(WriteStatus::Closed) => {
                tracing::debug!(
                    remaining = buffer.remaining_bytes(),
                    "peer closed channel during write"
                );
                drop(buffer);
                return abort(channel, completion);
            }
            Err(err) => {
                tracing::warn!(error = %err, "write failed, force-closing channel");
                drop(buffer);
                return abort(channel, completion);
            }
        }
    }
}

fn drain(channel: &mut dyn SinkChannel, completion: CompletionToken, resumed: bool) -> Drive {
    match shutdown_and_flush(channel) {
        Ok(FlushStatus::Flushed) => {
            if resumed {
                channel.suspend_writes();
            }
            signal(completion);
            Drive::Completed
        }
        Ok(FlushStatus::WouldBlock) => {
            tracing::debug!("flush would block, suspending until writable");
            channel.set_write_listener(Box::new(WriteTask::Flush { completion }));
            channel.resume_writes();
            Drive::Suspended
        }
        Err(err) => {
            tracing::warn!(error = %err, "shutdown or flush failed, force-closing channel");
            abort(channel, completion)
        }
    }
}

fn shutdown_and_flush(channel: &mut dyn SinkChannel) -> io::Result<FlushStatus> {
    channel.shutdown_writes()?;
    channel.flush()
}

fn resume_flush(channel: &mut dyn SinkChannel, completion: CompletionToken) {
    match channel.flush() {
        Ok(FlushStatus::Flushed) => {
            channel.suspend_writes();
            signal(completion);
        }
        Ok(FlushStatus::WouldBlock) => {
            channel.set_write_listener(Box::new(WriteTask::Flush { completion }));
        }
        Err(err) => {
            tracing::warn!(error = %err, "flush failed after resumption, force-closing channel");
            abort(channel, completion);
        }
    }
}

/// 强制关闭通道并完成。
pub(crate) fn abort(channel: &mut dyn SinkChannel, completion: CompletionToken) -> Drive {
    safe_close(channel);
    signal(completion);
    Drive::Completed
}

pub(crate) fn signal(completion: CompletionToken) {
    // 重复完成已在令牌内部以 error 级别记录。
    let _ = completion.complete();
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use spark_buffer::SlabBufferPool;
    use spark_transport::{ScriptedChannel, ScriptedFlush, ScriptedWrite};

    use super::*;

    fn counting() -> (CompletionToken, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        (
            CompletionToken::new(move || {
                observed.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn immediate_flush_completes_synchronously() {
        let mut channel = ScriptedChannel::new();
        let (completion, count) = counting();
        assert_eq!(drain_and_complete(&mut channel, completion), Drive::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(channel.is_write_shutdown());
        assert_eq!(channel.stats().resume_calls, 0);
    }

    #[test]
    fn resumed_flush_suspends_interest_before_completing() {
        let mut channel = ScriptedChannel::new().with_flushes([ScriptedFlush::WouldBlock]);
        let (completion, count) = counting();
        assert_eq!(drain_and_complete(&mut channel, completion), Drive::Suspended);
        assert!(channel.is_write_resumed());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(channel.fire_writable());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!channel.is_write_resumed());
        assert_eq!(channel.stats().shutdown_calls, 1);
    }

    #[test]
    fn closed_write_completes_without_free() {
        let pool = SlabBufferPool::new();
        let mut channel = ScriptedChannel::new().with_writes([ScriptedWrite::Closed]);
        let (completion, count) = counting();
        let drive = write_then_complete(pool.acquire_with(b"payload"), &mut channel, completion);
        assert_eq!(drive, Drive::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.stats().close_calls, 1);
        assert_eq!(pool.statistics().discarded, 1);
        assert_eq!(pool.statistics().freed, 0);
    }
}
