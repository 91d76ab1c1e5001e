//! 脚本化内存通道：在测试中同时扮演非阻塞通道与 Reactor。
//!
//! # 教案式综述
//! - **意图 (Why)**：写完成驱动器的正确性取决于任意的部分写、`WouldBlock` 与对端关闭序列，
//!   真实套接字难以稳定复现这些组合；脚本化通道让每一次 `write`/`flush` 的返回值都由测试决定。
//! - **结构 (How)**：写/刷新响应各自排成队列，队列耗尽后退化为“全部接受”/“刷新完成”；
//!   所有被接受的字节按顺序记录，关闭后的调用单独计数；
//!   [`ScriptedChannel::fire_writable`] 取出登记的监听任务并执行一次，模拟写就绪事件。
//! - **契约 (What)**：关闭后的 `write`/`flush` 返回 `NotConnected` 错误并计入 `calls_after_close`。

use std::{
    collections::VecDeque,
    io::{self, IoSlice},
};

use crate::{FlushStatus, ReadStatus, SinkChannel, SourceChannel, WriteReadyListener, WriteStatus};

/// 单次写入的脚本化响应。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedWrite {
    /// 接受至多 `n` 字节。
    Accept(usize),
    WouldBlock,
    Closed,
    Fail(io::ErrorKind),
}

/// 单次刷新的脚本化响应。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedFlush {
    Flushed,
    WouldBlock,
    Fail(io::ErrorKind),
}

/// 通道调用计数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub write_calls: usize,
    pub flush_calls: usize,
    pub shutdown_calls: usize,
    pub close_calls: usize,
    pub resume_calls: usize,
    pub suspend_calls: usize,
    pub listener_registrations: usize,
    /// 关闭之后仍然发生的 `write`/`flush`/`shutdown_writes` 调用。
    pub calls_after_close: usize,
}

/// 脚本化的 [`SinkChannel`] 实现。
#[derive(Default)]
pub struct ScriptedChannel {
    writes: VecDeque<ScriptedWrite>,
    flushes: VecDeque<ScriptedFlush>,
    written: Vec<u8>,
    closed: bool,
    write_shutdown: bool,
    write_resumed: bool,
    fail_close: bool,
    listener: Option<Box<dyn WriteReadyListener>>,
    stats: ChannelStats,
}

impl ScriptedChannel {
    /// 创建不带脚本的通道：所有写入全部接受、所有刷新立即完成。
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加写响应脚本。
    pub fn with_writes(mut self, script: impl IntoIterator<Item = ScriptedWrite>) -> Self {
        self.writes.extend(script);
        self
    }

    /// 追加刷新响应脚本。
    pub fn with_flushes(mut self, script: impl IntoIterator<Item = ScriptedFlush>) -> Self {
        self.flushes.extend(script);
        self
    }

    /// 让 `close` 返回错误，用于验证二次错误被吞掉。
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// 运行中追加写响应。
    pub fn push_write(&mut self, response: ScriptedWrite) {
        self.writes.push_back(response);
    }

    /// 按顺序记录的已接受字节。
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    pub fn is_write_shutdown(&self) -> bool {
        self.write_shutdown
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// 模拟对端断开：通道进入关闭状态，但不计入本地 `close` 调用。
    pub fn disconnect(&mut self) {
        self.closed = true;
    }

    /// 模拟一次写就绪事件；没有登记任务时返回 `false`。
    pub fn fire_writable(&mut self) -> bool {
        match self.listener.take() {
            Some(listener) => {
                listener.on_write_ready(self);
                true
            }
            None => false,
        }
    }

    /// 反复触发写就绪，直到没有登记任务或达到 `max_events`，返回触发次数。
    pub fn run_until_idle(&mut self, max_events: usize) -> usize {
        let mut fired = 0;
        while fired < max_events && self.fire_writable() {
            fired += 1;
        }
        fired
    }

    fn guard_open(&mut self) -> io::Result<()> {
        if self.closed {
            self.stats.calls_after_close += 1;
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "scripted channel is closed",
            ));
        }
        Ok(())
    }

    fn accept(&mut self, bytes: &[u8]) -> io::Result<WriteStatus> {
        self.stats.write_calls += 1;
        self.guard_open()?;
        let response = self
            .writes
            .pop_front()
            .unwrap_or(ScriptedWrite::Accept(usize::MAX));
        match response {
            ScriptedWrite::Accept(limit) => {
                let taken = limit.min(bytes.len());
                self.written.extend_from_slice(&bytes[..taken]);
                Ok(WriteStatus::Written(taken))
            }
            ScriptedWrite::WouldBlock => Ok(WriteStatus::WouldBlock),
            ScriptedWrite::Closed => Ok(WriteStatus::Closed),
            ScriptedWrite::Fail(kind) => Err(io::Error::new(kind, "scripted write failure")),
        }
    }
}

impl SinkChannel for ScriptedChannel {
    fn write(&mut self, src: &[u8]) -> io::Result<WriteStatus> {
        self.accept(src)
    }

    fn write_vectored(&mut self, srcs: &[IoSlice<'_>]) -> io::Result<WriteStatus> {
        let gathered: Vec<u8> = srcs.iter().flat_map(|src| src.iter().copied()).collect();
        self.accept(&gathered)
    }

    fn flush(&mut self) -> io::Result<FlushStatus> {
        self.stats.flush_calls += 1;
        self.guard_open()?;
        match self.flushes.pop_front().unwrap_or(ScriptedFlush::Flushed) {
            ScriptedFlush::Flushed => Ok(FlushStatus::Flushed),
            ScriptedFlush::WouldBlock => Ok(FlushStatus::WouldBlock),
            ScriptedFlush::Fail(kind) => Err(io::Error::new(kind, "scripted flush failure")),
        }
    }

    fn shutdown_writes(&mut self) -> io::Result<()> {
        self.stats.shutdown_calls += 1;
        self.guard_open()?;
        self.write_shutdown = true;
        Ok(())
    }

    fn resume_writes(&mut self) {
        self.stats.resume_calls += 1;
        self.write_resumed = true;
    }

    fn suspend_writes(&mut self) {
        self.stats.suspend_calls += 1;
        self.write_resumed = false;
    }

    fn is_write_resumed(&self) -> bool {
        self.write_resumed
    }

    fn set_write_listener(&mut self, listener: Box<dyn WriteReadyListener>) {
        self.stats.listener_registrations += 1;
        self.listener = Some(listener);
    }

    fn take_write_listener(&mut self) -> Option<Box<dyn WriteReadyListener>> {
        self.listener.take()
    }

    fn is_open(&self) -> bool {
        !self.closed
    }

    fn close(&mut self) -> io::Result<()> {
        self.stats.close_calls += 1;
        self.closed = true;
        self.write_resumed = false;
        if self.fail_close {
            return Err(io::Error::other("scripted close failure"));
        }
        Ok(())
    }
}

/// 脚本化的可读源：按给定分段返回数据，分段之间可插入 `WouldBlock`。
#[derive(Debug, Default)]
pub struct ScriptedSource {
    segments: VecDeque<Option<Vec<u8>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段数据。
    pub fn then_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.segments.push_back(Some(data.into()));
        self
    }

    /// 追加一次 `WouldBlock`。
    pub fn then_would_block(mut self) -> Self {
        self.segments.push_back(None);
        self
    }
}

impl SourceChannel for ScriptedSource {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<ReadStatus> {
        match self.segments.pop_front() {
            None => Ok(ReadStatus::EndOfStream),
            Some(None) => Ok(ReadStatus::WouldBlock),
            Some(Some(mut data)) => {
                let taken = data.len().min(dst.len());
                dst[..taken].copy_from_slice(&data[..taken]);
                if taken < data.len() {
                    data.drain(..taken);
                    self.segments.push_front(Some(data));
                }
                Ok(ReadStatus::Read(taken))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::TransferStatus;

    #[test]
    fn write_script_drives_partial_acceptance() {
        let mut channel = ScriptedChannel::new().with_writes([
            ScriptedWrite::Accept(2),
            ScriptedWrite::WouldBlock,
            ScriptedWrite::Closed,
        ]);
        assert_eq!(channel.write(b"hello").unwrap(), WriteStatus::Written(2));
        assert_eq!(channel.write(b"llo").unwrap(), WriteStatus::WouldBlock);
        assert_eq!(channel.write(b"llo").unwrap(), WriteStatus::Closed);
        assert_eq!(channel.write(b"llo").unwrap(), WriteStatus::Written(3));
        assert_eq!(channel.written(), b"hello");
    }

    #[test]
    fn calls_after_close_are_counted() {
        let mut channel = ScriptedChannel::new();
        channel.close().unwrap();
        assert!(channel.write(b"x").is_err());
        assert!(channel.flush().is_err());
        assert_eq!(channel.stats().calls_after_close, 2);
    }

    #[test]
    fn file_transfer_stops_at_partial_write() {
        let mut channel = ScriptedChannel::new().with_writes([ScriptedWrite::Accept(3)]);
        let mut file = io::Cursor::new(b"0123456789".to_vec());
        let moved = channel.transfer_from_file(&mut file, 2, 6).unwrap();
        assert_eq!(moved, 3);
        assert_eq!(channel.written(), b"234");
        let moved = channel.transfer_from_file(&mut file, 2 + moved, 3).unwrap();
        assert_eq!(moved, 3);
        assert_eq!(channel.written(), b"234567");
    }

    #[test]
    fn source_transfer_keeps_unwritten_bytes_in_through_buffer() {
        let mut channel = ScriptedChannel::new()
            .with_writes([ScriptedWrite::Accept(2), ScriptedWrite::WouldBlock]);
        let mut source = ScriptedSource::new().then_data("abcdef");
        let mut through = BytesMut::with_capacity(16);

        let status = channel
            .transfer_from_source(&mut source, 6, &mut through)
            .unwrap();
        assert_eq!(status, TransferStatus::Transferred(6));
        assert_eq!(&through[..], b"cdef");

        let status = channel
            .transfer_from_source(&mut source, 6, &mut through)
            .unwrap();
        assert_eq!(status, TransferStatus::EndOfStream);
        assert!(through.is_empty());
        assert_eq!(channel.written(), b"abcdef");
    }
}
