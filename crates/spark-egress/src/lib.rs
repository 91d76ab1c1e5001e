#![deny(unsafe_code)]
#![doc = "spark-egress: 出站写出管线核心。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：HTTP 响应体与 WebSocket 帧载荷在非阻塞通道上写出时，必须在部分写、背压、对端关闭、"]
#![doc = "  I/O 失败、内容校验失败与处理器异常等所有出口上都恰好触发一次完成信号。"]
#![doc = "- **What**：提供单次完成令牌、写完成驱动器、增量 UTF-8 校验器、帧写出器与异常安全分发包装器。"]
#![doc = "- **How**：挂起的写操作以 `WriteTask` 登记在通道上，由外部 Reactor 唤醒；"]
#![doc = "  帧写出器在转发前校验整段字节，只提交通道实际接受的前缀。"]
#![doc = ""]
#![doc = "== 日志 =="]
#![doc = "库内只使用 `tracing` 宏发出事件，不安装订阅者；宿主进程自行决定输出格式与过滤级别。"]

mod completion;
mod config;
mod dispatch;
mod driver;
mod error;
mod sink;
mod utf8;

pub use completion::{CompletionFuse, CompletionToken};
pub use config::EgressConfig;
pub use dispatch::{HandlerExecutor, HttpHandler, ServerExchange, execute_handler};
pub use driver::{Drive, WriteTask, drain_and_complete, write_then_complete};
pub use error::{CloseReason, CompletionError, ConfigError, EgressError, Utf8Error, Utf8ErrorKind};
pub use sink::{FrameCapabilities, FrameSink, FrameType, PayloadValidator, SinkState, Unvalidated};
pub use utf8::Utf8Validator;
