//! 帧写出器：一条出站逻辑帧/消息的“先校验、后转发”汇点。
//!
//! # 教案式综述
//! - **意图 (Why)**：HTTP 响应体与 WebSocket 帧载荷共享同一套写出语义，差别只在于载荷是否需要内容校验
//!   以及帧类型的能力位。以“帧类型能力表 + 可组合的校验器”取代层层覆写的继承链，
//!   文本帧只是带了 UTF-8 校验器的普通帧写出器；
//! - **逻辑 (How)**：
//!   1. 每次写入先在校验器副本上校验整段待写字节，任何非法字节都在转发前拦截；
//!   2. 通道只接受前缀时，仅把被接受的前缀提交进真实校验器，未写出的尾部在重新提交时从同一状态继续，
//!      避免同一字节被计入两次；
//!   3. 校验型转移把源数据读入中转块，再走同一条校验写路径，校验与拷贝针对的是同一批字节；
//! - **契约 (What)**：
//!   - 写入总量不得超过声明的载荷长度，结束时不得少于它；
//!   - 任何失败都使写出器进入 [`SinkState::Failed`]，之后的调用一律返回 [`EgressError::SinkFailed`]；
//!   - 对端关闭以 [`WriteStatus::Closed`] 原样返回，写出器同样进入失败状态。

mod text;

use std::io::{self, IoSlice};

use bytes::{Buf, BytesMut};
use spark_transport::{
    DEFAULT_TRANSFER_CHUNK, FileRegion, FlushStatus, SinkChannel, SourceChannel, TransferStatus,
    WriteStatus, transfer_file_with, transfer_source_with,
};

use crate::{
    completion::CompletionToken,
    driver::{self, Drive},
    error::{EgressError, Utf8Error},
};

/// 帧类型。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Text,
    Binary,
    Continuation,
    Close,
    Ping,
    Pong,
}

/// 帧类型的固定能力位。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCapabilities {
    /// 是否允许拆分为多帧发送。
    pub fragmentation: bool,
    /// 是否允许携带扩展数据。
    pub extensions: bool,
}

const DATA_FRAME: FrameCapabilities = FrameCapabilities {
    fragmentation: true,
    extensions: true,
};

const CONTROL_FRAME: FrameCapabilities = FrameCapabilities {
    fragmentation: false,
    extensions: false,
};

impl FrameType {
    /// 能力表：数据帧支持分片与扩展，控制帧两者皆不支持。
    pub const fn capabilities(self) -> FrameCapabilities {
        match self {
            FrameType::Text | FrameType::Binary | FrameType::Continuation => DATA_FRAME,
            FrameType::Close | FrameType::Ping | FrameType::Pong => CONTROL_FRAME,
        }
    }

    pub const fn is_control(self) -> bool {
        matches!(self, FrameType::Close | FrameType::Ping | FrameType::Pong)
    }
}

/// 载荷校验钩子。
///
/// 实现必须廉价可克隆：写出器在副本上做推测式校验，写出成功后再决定提交哪一部分。
pub trait PayloadValidator: Clone {
    /// 校验下一段载荷。
    fn validate(&mut self, bytes: &[u8]) -> Result<(), Utf8Error>;

    /// 声明消息结束。
    fn finish(&mut self) -> Result<(), Utf8Error>;

    /// 是否真的在做校验；为 `false` 时写出器走不拷贝的直通路径。
    fn is_active(&self) -> bool;
}

/// 不做任何校验的占位校验器。
#[derive(Clone, Copy, Debug, Default)]
pub struct Unvalidated;

impl PayloadValidator for Unvalidated {
    fn validate(&mut self, _bytes: &[u8]) -> Result<(), Utf8Error> {
        Ok(())
    }

    fn finish(&mut self) -> Result<(), Utf8Error> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }
}

impl<V: PayloadValidator> PayloadValidator for Option<V> {
    fn validate(&mut self, bytes: &[u8]) -> Result<(), Utf8Error> {
        match self {
            Some(validator) => validator.validate(bytes),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> Result<(), Utf8Error> {
        match self {
            Some(validator) => validator.finish(),
            None => Ok(()),
        }
    }

    fn is_active(&self) -> bool {
        self.as_ref().is_some_and(PayloadValidator::is_active)
    }
}

/// 写出器生命周期。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Finished,
    Failed,
}

/// 一条出站逻辑帧/消息的写出器。
///
/// `C` 为该帧所占用的通道；传入 `&mut T` 即可借用连接而不接管它。
pub struct FrameSink<C, V = Unvalidated> {
    channel: C,
    frame_type: FrameType,
    payload_size: u64,
    written: u64,
    validator: V,
    state: SinkState,
    transfer_chunk: usize,
}

impl<C: SinkChannel> FrameSink<C, Unvalidated> {
    /// 创建不做内容校验的写出器。
    pub fn new(channel: C, frame_type: FrameType, payload_size: u64) -> Self {
        Self::with_validator(channel, frame_type, payload_size, Unvalidated)
    }
}

impl<C: SinkChannel, V: PayloadValidator> FrameSink<C, V> {
    pub(crate) fn with_validator(
        channel: C,
        frame_type: FrameType,
        payload_size: u64,
        validator: V,
    ) -> Self {
        Self {
            channel,
            frame_type,
            payload_size,
            written: 0,
            validator,
            state: SinkState::Open,
            transfer_chunk: DEFAULT_TRANSFER_CHUNK,
        }
    }

    /// 创建分片消息的后续帧，沿用上一帧交出的校验器状态。
    pub fn continuation(channel: C, payload_size: u64, validator: V) -> Self {
        Self::with_validator(channel, FrameType::Continuation, payload_size, validator)
    }

    /// 设置校验型转移使用的中转块大小（为 0 时取默认值）。
    pub fn with_transfer_buffer_size(mut self, size: usize) -> Self {
        self.transfer_chunk = if size == 0 {
            DEFAULT_TRANSFER_CHUNK
        } else {
            size
        };
        self
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn is_fragmentation_supported(&self) -> bool {
        self.frame_type.capabilities().fragmentation
    }

    pub fn are_extensions_supported(&self) -> bool {
        self.frame_type.capabilities().extensions
    }

    pub fn payload_size(&self) -> u64 {
        self.payload_size
    }

    /// 已被通道接受的载荷字节数。
    pub fn written(&self) -> u64 {
        self.written
    }

    /// 距声明长度尚缺的字节数。
    pub fn remaining(&self) -> u64 {
        self.payload_size.saturating_sub(self.written)
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn validator(&self) -> &V {
        &self.validator
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// 校验后写入 `src` 的前缀，返回值语义与底层通道一致。
    pub fn write(&mut self, src: &[u8]) -> Result<WriteStatus, EgressError> {
        self.ensure_open()?;
        if src.is_empty() {
            return Ok(WriteStatus::Written(0));
        }
        self.ensure_capacity(src.len() as u64)?;
        let speculative = self.speculate([src])?;
        let status = self
            .channel
            .write(src)
            .map_err(|err| self.fail(EgressError::from_io(err)))?;
        self.settle([src], src.len(), status, speculative)
    }

    /// 校验全部切片后聚合写入。
    pub fn write_vectored(&mut self, srcs: &[IoSlice<'_>]) -> Result<WriteStatus, EgressError> {
        self.ensure_open()?;
        let submitted: usize = srcs.iter().map(|src| src.len()).sum();
        if submitted == 0 {
            return Ok(WriteStatus::Written(0));
        }
        self.ensure_capacity(submitted as u64)?;
        let speculative = self.speculate(srcs.iter().map(|src| &**src))?;
        let status = self
            .channel
            .write_vectored(srcs)
            .map_err(|err| self.fail(EgressError::from_io(err)))?;
        self.settle(srcs.iter().map(|src| &**src), submitted, status, speculative)
    }

    /// 从文件区域转移至多 `count` 字节，返回被通道接受的字节数。
    pub fn transfer_from_file(
        &mut self,
        file: &mut dyn FileRegion,
        position: u64,
        count: u64,
    ) -> Result<u64, EgressError> {
        self.ensure_open()?;
        self.ensure_capacity(count)?;
        if !self.validator.is_active() {
            let moved = self
                .channel
                .transfer_from_file(file, position, count)
                .map_err(|err| self.fail(transfer_error(err)))?;
            self.written += moved;
            return Ok(moved);
        }

        let chunk = self.transfer_chunk;
        transfer_file_with(file, position, count, chunk, |bytes| self.write_accepted(bytes))
            .map_err(|err| self.fail(err))
    }

    /// 经由中转缓冲 `through` 从源通道转移至多 `count` 字节。
    ///
    /// 语义与 [`SinkChannel::transfer_from_source`] 相同：返回本次从源读取的字节数，
    /// 读出但未被接受的字节留在 `through`，下一次调用先写出它们。
    pub fn transfer_from_source(
        &mut self,
        source: &mut dyn SourceChannel,
        count: u64,
        through: &mut BytesMut,
    ) -> Result<TransferStatus, EgressError> {
        self.ensure_open()?;
        let buffered = through.remaining() as u64;
        self.ensure_capacity(buffered + count)?;
        if !self.validator.is_active() {
            let status = self
                .channel
                .transfer_from_source(source, count, through)
                .map_err(|err| self.fail(transfer_error(err)))?;
            let read = match status {
                TransferStatus::Transferred(read) => read,
                TransferStatus::WouldBlock | TransferStatus::EndOfStream => 0,
            };
            self.written += buffered + read - through.remaining() as u64;
            return Ok(status);
        }

        let chunk = self.transfer_chunk;
        transfer_source_with(source, count, through, chunk, |bytes| self.write_accepted(bytes))
            .map_err(|err| self.fail(err))
    }

    /// 结束整条消息：未完成的多字节序列或不足声明长度都判为失败。重复调用为空操作。
    pub fn finish(&mut self) -> Result<(), EgressError> {
        match self.state {
            SinkState::Finished => return Ok(()),
            SinkState::Failed => return Err(EgressError::SinkFailed),
            SinkState::Open => {}
        }
        if let Err(err) = self.validator.finish() {
            return Err(self.fail(err.into()));
        }
        self.ensure_complete_payload()?;
        self.state = SinkState::Finished;
        Ok(())
    }

    /// 结束分片消息中的一帧，交还通道与校验器，供 [`FrameSink::continuation`] 接续。
    ///
    /// 帧边界可以落在多字节序列中间，因此这里不调用校验器的 `finish`。
    pub fn finish_fragment(mut self) -> Result<(C, V), EgressError> {
        self.ensure_open()?;
        self.ensure_complete_payload()?;
        self.state = SinkState::Finished;
        Ok((self.channel, self.validator))
    }

    /// 结束消息并驱动半关闭、刷新与完成。
    ///
    /// 结束校验失败时强制关闭通道、仍然触发 `completion`，并把失败原因返回给调用方选择关闭码。
    ///
    /// 返回 [`Drive::Suspended`] 时刷新任务连同完成令牌登记在通道上，调用方须保留通道
    /// （借用或经 [`into_inner`](Self::into_inner) 取回）并交给 Reactor 驱动；
    /// 因此这里只借用写出器，不消费它。
    pub fn complete(&mut self, completion: CompletionToken) -> Result<Drive, EgressError> {
        if let Err(err) = self.finish() {
            let _ = driver::abort(&mut self.channel, completion);
            return Err(err);
        }
        Ok(driver::drain_and_complete(&mut self.channel, completion))
    }

    /// 放弃本帧：强制关闭通道并完成。
    pub fn abort(&mut self, completion: CompletionToken) -> Drive {
        self.state = SinkState::Failed;
        driver::abort(&mut self.channel, completion)
    }

    /// 转移循环使用的写入：对端关闭直接作为错误结束循环。
    fn write_accepted(&mut self, bytes: &[u8]) -> Result<WriteStatus, EgressError> {
        match self.write(bytes)? {
            WriteStatus::Closed => Err(EgressError::PeerClosed),
            status => Ok(status),
        }
    }

    fn ensure_open(&self) -> Result<(), EgressError> {
        match self.state {
            SinkState::Open => Ok(()),
            SinkState::Finished | SinkState::Failed => Err(EgressError::SinkFailed),
        }
    }

    fn ensure_capacity(&mut self, additional: u64) -> Result<(), EgressError> {
        let attempted = self.written.saturating_add(additional);
        if attempted > self.payload_size {
            return Err(self.fail(EgressError::PayloadOverflow {
                declared: self.payload_size,
                attempted,
            }));
        }
        Ok(())
    }

    fn ensure_complete_payload(&mut self) -> Result<(), EgressError> {
        if self.written < self.payload_size {
            return Err(self.fail(EgressError::PayloadUnderflow {
                declared: self.payload_size,
                written: self.written,
            }));
        }
        Ok(())
    }

    /// 在校验器副本上校验整段待写字节。
    fn speculate<'a>(
        &mut self,
        chunks: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<Option<V>, EgressError> {
        if !self.validator.is_active() {
            return Ok(None);
        }
        let mut speculative = self.validator.clone();
        for chunk in chunks {
            if let Err(err) = speculative.validate(chunk) {
                // 失败状态是永久的，直接以副本替换。
                self.validator = speculative;
                return Err(self.fail(err.into()));
            }
        }
        Ok(Some(speculative))
    }

    /// 按通道实际接受的字节数推进计数并提交校验状态。
    fn settle<'a>(
        &mut self,
        chunks: impl IntoIterator<Item = &'a [u8]>,
        submitted: usize,
        status: WriteStatus,
        speculative: Option<V>,
    ) -> Result<WriteStatus, EgressError> {
        let accepted = match status {
            WriteStatus::Written(accepted) => accepted,
            WriteStatus::WouldBlock => return Ok(status),
            WriteStatus::Closed => {
                tracing::debug!(
                    frame_type = ?self.frame_type,
                    written = self.written,
                    "peer closed channel during frame write"
                );
                self.state = SinkState::Failed;
                return Ok(status);
            }
        };
        self.written += accepted as u64;
        match speculative {
            None => {}
            Some(speculative) if accepted >= submitted => self.validator = speculative,
            Some(_) => {
                // 只提交被接受的前缀；它是已校验字节流的前缀，不会在此失败。
                let mut left = accepted;
                for chunk in chunks {
                    if left == 0 {
                        break;
                    }
                    let take = left.min(chunk.len());
                    if let Err(err) = self.validator.validate(&chunk[..take]) {
                        return Err(self.fail(err.into()));
                    }
                    left -= take;
                }
            }
        }
        Ok(status)
    }

    fn fail(&mut self, err: EgressError) -> EgressError {
        if self.state == SinkState::Failed {
            return err;
        }
        tracing::debug!(
            frame_type = ?self.frame_type,
            written = self.written,
            error = %err,
            "frame sink failed"
        );
        self.state = SinkState::Failed;
        err
    }
}

/// 以 `std::io::Write` 的形态暴露写出器，便于 `write!` 一类的格式化写入。
///
/// 错误穿越 `io::Error` 边界后可用 [`EgressError::from_io`] 还原。
impl<C: SinkChannel, V: PayloadValidator> io::Write for FrameSink<C, V> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match FrameSink::write(self, buf)? {
            WriteStatus::Written(written) => Ok(written),
            WriteStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
            WriteStatus::Closed => Err(EgressError::PeerClosed.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.channel.flush()? {
            FlushStatus::Flushed => Ok(()),
            FlushStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

fn transfer_error(err: io::Error) -> EgressError {
    if err.kind() == io::ErrorKind::BrokenPipe {
        EgressError::PeerClosed
    } else {
        EgressError::from_io(err)
    }
}
