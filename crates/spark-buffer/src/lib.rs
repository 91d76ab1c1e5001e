//! `spark-buffer` 提供出站写路径所需的池化缓冲实现。
//!
//! # 模块定位（Why）
//! - 写完成驱动器需要一个“只能释放一次”的缓冲句柄：排空后归还池，连接关闭时丢弃，
//!   绝不允许重复释放，也不允许在释放后继续写出；
//! - 基于 `bytes::BytesMut` 实现，使写路径可以直接以 [`bytes::Buf`] 视角推进读指针。
//!
//! # 设计概要（How）
//! - `pooled_buffer` 模块实现 [`PooledBuffer`]，`free(self)` 消费句柄，从类型上杜绝二次释放；
//! - 未经 `free` 即被丢弃的缓冲在 `Drop` 中以 [`ReleaseKind::Discarded`] 通知回收器；
//! - `pool` 模块实现 [`SlabBufferPool`]，以自由链表复用 `Freed` 归还的内存块。
//!
//! # 命名约定（Consistency）
//! - 沿用 `BufferRecycler`/`ReclaimedBuffer` 等回收术语，保持与池实现的一致。

mod pool;
mod pooled_buffer;

pub use pool::{PoolStats, SlabBufferPool};
pub use pooled_buffer::{BufferRecycler, PooledBuffer, ReclaimedBuffer, ReleaseKind};
