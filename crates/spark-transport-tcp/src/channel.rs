use socket2::SockRef;
use spark_transport::{FlushStatus, SinkChannel, WriteReadyListener, WriteStatus};
use std::{
    fmt,
    io::{self, IoSlice},
    net::{Shutdown as StdShutdown, SocketAddr},
};
use tokio::net::TcpStream as TokioTcpStream;

/// TCP 出站通道，封装非阻塞写入、半关闭与写就绪任务登记。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 将 Tokio `TcpStream` 适配为 [`SinkChannel`]，使写完成驱动器无需了解 Tokio 类型；
/// - 写就绪任务保存在通道内部，由 [`drive_writes`](crate::drive_writes) 在可写时取出执行。
///
/// ## 逻辑 (How)
/// - `write`/`write_vectored` 调用 `try_write*`，将 `WouldBlock` 与对端断开分别映射为状态；
/// - `shutdown_writes` 与 `close` 通过 `SockRef` 执行半关闭/全关闭；
/// - `write_resumed` 记录写就绪关注，驱动循环仅在关注开启时等待可写。
///
/// ## 契约 (What)
/// - `close` 之后所有写入返回 `NotConnected`；
/// - `flush` 恒为 `Flushed`，但关闭后同样返回错误。
///
/// ## 注意事项 (Trade-offs)
/// - 通道独占 `TcpStream`，不支持多任务并发写；这与“每连接单逻辑线程”的模型一致。
pub struct TcpSinkChannel {
    stream: TokioTcpStream,
    peer_addr: Option<SocketAddr>,
    open: bool,
    write_shutdown: bool,
    write_resumed: bool,
    listener: Option<Box<dyn WriteReadyListener>>,
}

impl TcpSinkChannel {
    /// 包装一个已建立的 Tokio 连接。
    pub fn from_stream(stream: TokioTcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream,
            peer_addr,
            open: true,
            write_shutdown: false,
            write_resumed: false,
            listener: None,
        }
    }

    /// 建立到目标地址的连接。
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TokioTcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    /// 对端地址。
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// 是否已有登记的写就绪任务。
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// 写方向是否已半关闭。
    pub fn is_write_shutdown(&self) -> bool {
        self.write_shutdown
    }

    pub(crate) async fn writable(&self) -> io::Result<()> {
        self.stream.writable().await
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "tcp sink channel is closed",
            ))
        }
    }
}

/// 将一次 `try_write*` 的结果映射为 [`WriteStatus`]。
fn classify_write(result: io::Result<usize>, requested: usize) -> io::Result<WriteStatus> {
    match result {
        Ok(0) if requested > 0 => Ok(WriteStatus::Closed),
        Ok(written) => Ok(WriteStatus::Written(written)),
        Err(err) => match err.kind() {
            io::ErrorKind::WouldBlock => Ok(WriteStatus::WouldBlock),
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => {
                tracing::debug!(error = %err, "tcp peer closed during write");
                Ok(WriteStatus::Closed)
            }
            _ => Err(err),
        },
    }
}

impl SinkChannel for TcpSinkChannel {
    fn write(&mut self, src: &[u8]) -> io::Result<WriteStatus> {
        self.ensure_open()?;
        classify_write(self.stream.try_write(src), src.len())
    }

    fn write_vectored(&mut self, srcs: &[IoSlice<'_>]) -> io::Result<WriteStatus> {
        self.ensure_open()?;
        let requested = srcs.iter().map(|src| src.len()).sum();
        classify_write(self.stream.try_write_vectored(srcs), requested)
    }

    fn flush(&mut self) -> io::Result<FlushStatus> {
        self.ensure_open()?;
        Ok(FlushStatus::Flushed)
    }

    fn shutdown_writes(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        if !self.write_shutdown {
            SockRef::from(&self.stream).shutdown(StdShutdown::Write)?;
            self.write_shutdown = true;
        }
        Ok(())
    }

    fn resume_writes(&mut self) {
        self.write_resumed = true;
    }

    fn suspend_writes(&mut self) {
        self.write_resumed = false;
    }

    fn is_write_resumed(&self) -> bool {
        self.write_resumed
    }

    fn set_write_listener(&mut self, listener: Box<dyn WriteReadyListener>) {
        self.listener = Some(listener);
    }

    fn take_write_listener(&mut self) -> Option<Box<dyn WriteReadyListener>> {
        self.listener.take()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> io::Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.write_resumed = false;
        match SockRef::from(&self.stream).shutdown(StdShutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for TcpSinkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSinkChannel")
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.open)
            .field("write_shutdown", &self.write_shutdown)
            .field("write_resumed", &self.write_resumed)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
