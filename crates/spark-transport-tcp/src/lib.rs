#![doc = r#"
# spark-transport-tcp

## 设计动机（Why）
- **定位**：为 `spark-transport` 的非阻塞通道契约提供 Tokio 上的 TCP 实现，
  让写完成驱动器与帧写出通道可以直接落在真实套接字上。
- **架构角色**：扮演出站管线所依赖的“外部 Reactor”的最小具体实现：
  [`TcpSinkChannel`] 负责一次性的非阻塞写入，[`drive_writes`] 负责等待写就绪并唤醒登记的任务。

## 核心契约（What）
- **输入条件**：调用方必须在 Tokio 运行时中使用本实现；
- **输出保障**：`write` 永不阻塞，`WouldBlock` 映射为 `WriteStatus::WouldBlock`，
  对端断开（`BrokenPipe`/`ConnectionReset`）映射为 `WriteStatus::Closed`；
- **前置约束**：同一连接的所有写调用都在同一个任务中串行发生。

## 实现策略（How）
- 写入使用 `TcpStream::try_write`/`try_write_vectored`，不经过 `AsyncWrite`；
- 半关闭通过 `socket2::SockRef` 完成，不需要拆分读写半部；
- `drive_writes` 循环等待 `writable()`，每次就绪最多执行一个登记任务。

## 风险与考量（Trade-offs）
- TCP 没有用户态写缓冲，`flush` 恒为完成；若未来叠加 TLS，需要在 TLS 通道中实现真正的刷新语义。
"#]

mod channel;
mod reactor;

pub use channel::TcpSinkChannel;
pub use reactor::drive_writes;
