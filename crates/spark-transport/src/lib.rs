#![deny(unsafe_code)]
#![doc = "spark-transport: 非阻塞字节通道契约。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：HTTP 响应写出与 WebSocket 帧写出共享同一条出站管线，需要一份与具体 Reactor 无关的通道语言。"]
#![doc = "- **What**：定义 `SinkChannel`/`SourceChannel`/`FileRegion` 与写就绪监听 `WriteReadyListener`，以及写/刷新/读取/转移的状态枚举。"]
#![doc = "- **How**：所有调用立即返回；`WouldBlock` 是状态而非错误，真正的 I/O 失败通过 `io::Error` 传播。"]

mod channel;
mod close;
#[cfg(any(test, feature = "test-util"))]
mod scripted;
mod transfer;

pub use channel::{
    DEFAULT_TRANSFER_CHUNK, FileRegion, FlushStatus, ReadStatus, SinkChannel, SourceChannel,
    TransferStatus, WriteReadyListener, WriteStatus,
};
pub use close::safe_close;
pub use transfer::{transfer_file_with, transfer_source_with};
#[cfg(any(test, feature = "test-util"))]
pub use scripted::{ChannelStats, ScriptedChannel, ScriptedFlush, ScriptedSource, ScriptedWrite};
