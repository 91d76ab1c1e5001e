use std::io::{self, IoSlice, Read, Seek, SeekFrom};

use bytes::BytesMut;

use crate::transfer::{transfer_file_with, transfer_source_with};

/// 未指定中转缓冲容量时单次转移读取的字节数。
pub const DEFAULT_TRANSFER_CHUNK: usize = 8 * 1024;

/// 一次非阻塞写入的结果。
///
/// - `Written(n)`：通道接受了前 `n` 个字节，`n` 可能小于提交长度；
/// - `WouldBlock`：当前无法推进，调用方应挂起并等待写就绪；
/// - `Closed`：对端已关闭，本次写操作终止，不应重试。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    Written(usize),
    WouldBlock,
    Closed,
}

impl WriteStatus {
    /// 本次被接受的字节数；`WouldBlock`/`Closed` 视为 0。
    pub fn written(&self) -> usize {
        match self {
            WriteStatus::Written(n) => *n,
            WriteStatus::WouldBlock | WriteStatus::Closed => 0,
        }
    }
}

/// 刷新结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushStatus {
    Flushed,
    WouldBlock,
}

/// 一次非阻塞读取的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    Read(usize),
    WouldBlock,
    EndOfStream,
}

/// 从源通道向汇通道转移的结果。
///
/// `Transferred(n)` 中的 `n` 为本次从源读取的字节数；其中尚未被汇通道接受的部分
/// 留在调用方提供的中转缓冲里，下一次转移会先写出它们。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    Transferred(u64),
    WouldBlock,
    EndOfStream,
}

/// 写就绪监听：被挂起的写操作以显式任务对象的形式登记在通道上。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 写操作遇到 `WouldBlock` 时需要“从原地继续”，把剩余偏移、缓冲与完成回调捕获进任务对象，
///   比在通道上反复改写回调字段更容易推理；
/// - Reactor 只负责在写就绪时取出任务并调用一次，不关心任务内部做什么。
///
/// ## 契约（What）
/// - `on_write_ready` 消费任务本身：每次登记最多被执行一次；
/// - 任务若仍需等待，必须重新调用 [`SinkChannel::set_write_listener`] 登记自己；
/// - 通道已关闭时任务同样会被唤醒，实现方应短路到完成回调而不是重试写入。
pub trait WriteReadyListener: Send {
    /// 通道可写（或已关闭）时由 Reactor 调用。
    fn on_write_ready(self: Box<Self>, channel: &mut dyn SinkChannel);
}

/// 非阻塞可读源，用于 `transfer_from_source`。
pub trait SourceChannel {
    /// 读取至多 `dst.len()` 字节。
    fn read(&mut self, dst: &mut [u8]) -> io::Result<ReadStatus>;
}

/// 可按位置读取的文件区域，用于 `transfer_from_file`。
pub trait FileRegion {
    /// 从 `position` 开始读取至多 `dst.len()` 字节；返回 0 表示到达末尾。
    fn read_at(&mut self, dst: &mut [u8], position: u64) -> io::Result<usize>;
}

impl<T: Read + Seek> FileRegion for T {
    fn read_at(&mut self, dst: &mut [u8], position: u64) -> io::Result<usize> {
        self.seek(SeekFrom::Start(position))?;
        self.read(dst)
    }
}

/// 统一的非阻塞出站通道接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 为 HTTP 响应体与 WebSocket 帧写出提供一致的写/刷新/半关闭/挂起接口；
/// - 写就绪通知以 [`WriteReadyListener`] 任务对象登记，Reactor 的具体实现
///   （Tokio、io_uring 或测试脚本）对上层透明。
///
/// ## 契约说明（What）
/// - `write`/`write_vectored`：执行一次写入尝试，绝不阻塞；
/// - `flush`：尝试把内部缓冲推向内核，`WouldBlock` 表示稍后重试；
/// - `shutdown_writes`：声明不再写入新数据，之后仍需 `flush` 才算完成；
/// - `resume_writes`/`suspend_writes`：开启/关闭写就绪关注；
/// - `close`：无条件终止，之后所有写入都应失败；
/// - 转移方法提供基于 `write` 的默认实现，具体通道可覆盖为零拷贝路径。
///
/// ## 风险提示（Trade-offs）
/// - trait 保持对象安全，驱动器以 `&mut dyn SinkChannel` 工作，多一次虚调用换取实现可替换性；
/// - 单连接的所有调用都在同一逻辑线程上串行发生，接口因此使用 `&mut self` 而非内部锁。
pub trait SinkChannel {
    /// 写入 `src` 的前缀。
    fn write(&mut self, src: &[u8]) -> io::Result<WriteStatus>;

    /// 聚合写入；默认只尝试第一个非空切片。
    fn write_vectored(&mut self, srcs: &[IoSlice<'_>]) -> io::Result<WriteStatus> {
        match srcs.iter().find(|src| !src.is_empty()) {
            Some(src) => self.write(src),
            None => Ok(WriteStatus::Written(0)),
        }
    }

    /// 刷新内部缓冲。
    fn flush(&mut self) -> io::Result<FlushStatus>;

    /// 半关闭写方向。
    fn shutdown_writes(&mut self) -> io::Result<()>;

    /// 开启写就绪关注。
    fn resume_writes(&mut self);

    /// 关闭写就绪关注。
    fn suspend_writes(&mut self);

    /// 当前是否关注写就绪。
    fn is_write_resumed(&self) -> bool;

    /// 登记写就绪任务，覆盖此前尚未执行的任务。
    fn set_write_listener(&mut self, listener: Box<dyn WriteReadyListener>);

    /// 取出已登记的写就绪任务，供 Reactor 调用。
    fn take_write_listener(&mut self) -> Option<Box<dyn WriteReadyListener>>;

    /// 通道是否仍然打开。
    fn is_open(&self) -> bool;

    /// 关闭通道。
    fn close(&mut self) -> io::Result<()>;

    /// 从文件区域转移至多 `count` 字节，返回被通道接受的字节数。
    ///
    /// 读出但未被接受的尾部不计入返回值，调用方以 `position + 返回值` 继续即可。
    fn transfer_from_file(
        &mut self,
        file: &mut dyn FileRegion,
        position: u64,
        count: u64,
    ) -> io::Result<u64> {
        transfer_file_with(file, position, count, DEFAULT_TRANSFER_CHUNK, |bytes| {
            self.write(bytes)
        })
    }

    /// 经由中转缓冲 `through` 从源通道转移至多 `count` 字节。
    ///
    /// # 契约（What）
    /// - 进入时先写出 `through` 中上次遗留的字节；
    /// - 返回值统计本次从源读取的字节数，未写出的部分保留在 `through`；
    /// - 源到达末尾且本次未读到任何字节时返回 `EndOfStream`。
    fn transfer_from_source(
        &mut self,
        source: &mut dyn SourceChannel,
        count: u64,
        through: &mut BytesMut,
    ) -> io::Result<TransferStatus> {
        transfer_source_with(source, count, through, DEFAULT_TRANSFER_CHUNK, |bytes| {
            self.write(bytes)
        })
    }
}

/// 可变借用同样是通道：上层组件借用连接而非接管它，挂起的写任务因此不随组件一同销毁。
impl<T: SinkChannel + ?Sized> SinkChannel for &mut T {
    fn write(&mut self, src: &[u8]) -> io::Result<WriteStatus> {
        (**self).write(src)
    }

    fn write_vectored(&mut self, srcs: &[IoSlice<'_>]) -> io::Result<WriteStatus> {
        (**self).write_vectored(srcs)
    }

    fn flush(&mut self) -> io::Result<FlushStatus> {
        (**self).flush()
    }

    fn shutdown_writes(&mut self) -> io::Result<()> {
        (**self).shutdown_writes()
    }

    fn resume_writes(&mut self) {
        (**self).resume_writes();
    }

    fn suspend_writes(&mut self) {
        (**self).suspend_writes();
    }

    fn is_write_resumed(&self) -> bool {
        (**self).is_write_resumed()
    }

    fn set_write_listener(&mut self, listener: Box<dyn WriteReadyListener>) {
        (**self).set_write_listener(listener);
    }

    fn take_write_listener(&mut self) -> Option<Box<dyn WriteReadyListener>> {
        (**self).take_write_listener()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn transfer_from_file(
        &mut self,
        file: &mut dyn FileRegion,
        position: u64,
        count: u64,
    ) -> io::Result<u64> {
        (**self).transfer_from_file(file, position, count)
    }

    fn transfer_from_source(
        &mut self,
        source: &mut dyn SourceChannel,
        count: u64,
        through: &mut BytesMut,
    ) -> io::Result<TransferStatus> {
        (**self).transfer_from_source(source, count, through)
    }
}
