use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use bytes::BytesMut;
use spin::Mutex;

use crate::pooled_buffer::{BufferRecycler, PooledBuffer, ReclaimedBuffer, ReleaseKind};

/// `SlabBufferPool` 提供基于自由链表（Free List）的缓冲池实现，
/// 为出站写路径复用 `BytesMut`，以减少堆分配次数。
///
/// # 模块角色（Why）
/// - 为写完成驱动器提供 [`PooledBuffer`] 来源；
/// - 借助 `PooledBuffer` 的回收钩子，排空后显式 `free` 的内存回到链表，
///   因连接关闭而丢弃的缓冲只更新统计。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时优先复用足够大的块；
/// - `PoolMetrics` 通过原子计数跟踪分配字节、可用字节、活跃租约与释放/丢弃次数。
///
/// # 契约说明（What）
/// - **线程安全**：所有共享状态均通过 `spin::Mutex` 与原子计数保护；
/// - **后置条件**：`acquire` 返回的缓冲容量不小于 `min_capacity`；
///   `acquire_with` 返回已冻结、内容等于输入的缓冲。
///
/// # 设计权衡（Trade-offs）
/// - 丢弃路径不回收内存：被丢弃的缓冲可能仍处于未知读写进度，直接归还堆更稳妥；
/// - `shrink_to_fit` 采取“清空自由链表”的简单策略，便于在压测后快速归还峰值内存。
#[derive(Clone)]
pub struct SlabBufferPool {
    inner: Arc<PoolInner>,
}

impl Default for SlabBufferPool {
    fn default() -> Self {
        Self {
            inner: Arc::new(PoolInner::new()),
        }
    }
}

impl SlabBufferPool {
    /// 创建空池实例。
    pub fn new() -> Self {
        Self::default()
    }

    /// 租借一个可写缓冲，容量至少为 `min_capacity`。
    pub fn acquire(&self, min_capacity: usize) -> PooledBuffer {
        let raw = self.inner.acquire_buffer(min_capacity);
        let recycler: Arc<dyn BufferRecycler> = self.inner.clone();
        PooledBuffer::new(raw, recycler)
    }

    /// 租借缓冲、写入 `data` 并冻结，得到可直接交给写路径的只读缓冲。
    pub fn acquire_with(&self, data: &[u8]) -> PooledBuffer {
        let mut buffer = self.acquire(data.len());
        buffer.put_slice(data);
        buffer.freeze();
        buffer
    }

    /// 清空自由链表，返回归还给堆的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    /// 读取统计快照。
    pub fn statistics(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

/// 缓冲池统计快照。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// 当前仍归池所有的字节数（链表中 + 租借中）。
    pub allocated_bytes: usize,
    /// 自由链表中可立即复用的字节数。
    pub available_bytes: usize,
    /// 尚未回收的租约数量。
    pub active_leases: usize,
    /// 经 `free` 正常归还的次数。
    pub freed: u64,
    /// 未经 `free` 即被丢弃的次数。
    pub discarded: u64,
    /// 自由链表中的块数量。
    pub free_slots: usize,
}

struct PoolInner {
    free_list: Mutex<Vec<BytesMut>>,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            free_list: Mutex::new(Vec::new()),
            metrics: PoolMetrics::default(),
        }
    }

    /// 从自由链表或堆上获取一个满足容量的 `BytesMut`。
    fn acquire_buffer(&self, min_capacity: usize) -> BytesMut {
        let reused = {
            let mut list = self.free_list.lock();
            list.iter()
                .position(|buf| buf.capacity() >= min_capacity)
                .map(|index| list.swap_remove(index))
        };

        let buffer = match reused {
            Some(mut buf) => {
                buf.clear();
                self.metrics.decrease_available(buf.capacity());
                buf
            }
            None => {
                let buf = BytesMut::with_capacity(min_capacity);
                self.metrics.increase_on_new_allocation(buf.capacity());
                buf
            }
        };
        self.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
        buffer
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.metrics.decrease_available(reclaimed);
        self.metrics.decrease_on_loss(reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStats {
        let free_slots = self.free_list.lock().len();
        PoolStats {
            allocated_bytes: self.metrics.allocated_bytes.load(Ordering::Relaxed),
            available_bytes: self.metrics.available_bytes.load(Ordering::Relaxed),
            active_leases: self.metrics.active_leases.load(Ordering::Relaxed),
            freed: self.metrics.freed.load(Ordering::Relaxed),
            discarded: self.metrics.discarded.load(Ordering::Relaxed),
            free_slots,
        }
    }
}

impl BufferRecycler for PoolInner {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        saturating_sub(&self.metrics.active_leases, 1);
        let capacity = reclaimed.capacity();
        match reclaimed.kind() {
            ReleaseKind::Freed => self.metrics.freed.fetch_add(1, Ordering::Relaxed),
            ReleaseKind::Discarded => self.metrics.discarded.fetch_add(1, Ordering::Relaxed),
        };
        match reclaimed.into_buffer() {
            Some(buf) => {
                self.metrics.increase_available(buf.capacity());
                self.free_list.lock().push(buf);
            }
            None => self.metrics.decrease_on_loss(capacity),
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    freed: AtomicU64,
    discarded: AtomicU64,
}

impl PoolMetrics {
    fn increase_on_new_allocation(&self, capacity: usize) {
        self.allocated_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn increase_available(&self, capacity: usize) {
        self.available_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn decrease_available(&self, capacity: usize) {
        saturating_sub(&self.available_bytes, capacity);
    }

    fn decrease_on_loss(&self, capacity: usize) {
        saturating_sub(&self.allocated_bytes, capacity);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_capacity_returns_to_pool() {
        let pool = SlabBufferPool::new();
        let mut writable = pool.acquire(64);
        assert!(writable.capacity() >= 64);
        writable.put_slice(&[1, 2, 3, 4]);
        writable.free();
        let snapshot = pool.statistics();
        assert!(snapshot.available_bytes >= 64);
        assert_eq!(snapshot.freed, 1);
        assert_eq!(snapshot.active_leases, 0);

        let second = pool.acquire(16);
        assert_eq!(pool.statistics().free_slots, 0, "应复用链表中的块");
        second.free();
    }

    #[test]
    fn acquire_with_preserves_payload() {
        let pool = SlabBufferPool::new();
        let payload = [9u8, 8, 7, 6];
        let buffer = pool.acquire_with(&payload);
        assert!(!buffer.is_writable());
        assert_eq!(bytes::Buf::chunk(&buffer), &payload);
        drop(buffer);
        assert_eq!(pool.statistics().discarded, 1);
    }
}
