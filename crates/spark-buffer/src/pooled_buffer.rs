use std::{fmt, mem, sync::Arc};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// `BufferRecycler` 描述缓冲池在租借结束时的回收入口。
///
/// # 设计初衷（Why）
/// - 写完成驱动器只关心“何时释放”，不关心“释放到哪里”；回收接口把这两件事分开，
///   由池实现决定是放回自由链表还是仅更新统计。
///
/// # 使用方式（How）
/// - 缓冲池实现应当将自身或内部的回收句柄封装为 `Arc<dyn BufferRecycler>`，
///   在构造 [`PooledBuffer`] 时一并注入。
/// - 每个 `PooledBuffer` 的生命周期内 `reclaim` 恰好被调用一次：
///   要么来自显式的 [`PooledBuffer::free`]，要么来自未释放即被丢弃的 `Drop`。
///
/// # 契约定义（What）
/// - **前置条件**：实现必须线程安全，且调用过程中不得 panic，
///   否则 `Drop` 路径上的 panic 将导致进程异常终止。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 通知池回收一次租约。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 缓冲生命周期的结束方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseKind {
    /// 数据已全部写出，持有者显式调用 [`PooledBuffer::free`]。
    Freed,
    /// 写操作因通道关闭或错误终止，缓冲随句柄一同被丢弃。
    Discarded,
}

/// 表示一次回收动作所携带的上下文。
///
/// # 数据结构解析（How）
/// - `capacity`：本次租约的最终容量，保证池侧统计的一致性；
/// - `kind`：释放方式，池据此区分正常归还与异常丢弃；
/// - `buffer`：仅在 `Freed` 时携带已清空的 `BytesMut`，供池复用；
///   `Discarded` 或冻结后无法夺回所有权时为 `None`。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    capacity: usize,
    kind: ReleaseKind,
    buffer: Option<BytesMut>,
}

impl ReclaimedBuffer {
    /// 创建携带完整上下文的回收结果。
    pub fn new(capacity: usize, kind: ReleaseKind, buffer: Option<BytesMut>) -> Self {
        Self {
            capacity,
            kind,
            buffer,
        }
    }

    /// 返回本次回收的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 返回释放方式。
    pub fn kind(&self) -> ReleaseKind {
        self.kind
    }

    /// 消耗结构并返回可复用的 `BytesMut`，若不存在则为 `None`。
    pub fn into_buffer(self) -> Option<BytesMut> {
        self.buffer
    }
}

/// 表征缓冲当前所处的读写状态。
///
/// - `Writable`：持有 `BytesMut`，可被追加写入；
/// - `ReadOnly`：冻结后的 `Bytes`，只允许读取与推进读指针。
#[derive(Debug)]
enum BufferState {
    Writable(BytesMut),
    ReadOnly(Bytes),
}

impl BufferState {
    fn len(&self) -> usize {
        match self {
            BufferState::Writable(buf) => buf.len(),
            BufferState::ReadOnly(bytes) => bytes.len(),
        }
    }

    fn chunk(&self) -> &[u8] {
        match self {
            BufferState::Writable(buf) => buf.as_ref(),
            BufferState::ReadOnly(bytes) => bytes.as_ref(),
        }
    }

    fn advance(&mut self, len: usize) {
        match self {
            BufferState::Writable(buf) => buf.advance(len),
            BufferState::ReadOnly(bytes) => bytes.advance(len),
        }
    }

    /// 尝试取回底层 `BytesMut` 并清空，供池复用。
    ///
    /// 读指针推进过的缓冲只剩尾部视图，容量随之缩小；清空后按租约容量 `reserve`，
    /// 独占的分配会被原地收回，池拿到的块因此仍满足原租约。
    fn into_reusable(self, capacity: usize) -> Option<BytesMut> {
        let mut buf = match self {
            BufferState::Writable(buf) => buf,
            BufferState::ReadOnly(bytes) => bytes.try_into_mut().ok()?,
        };
        buf.clear();
        buf.reserve(capacity);
        Some(buf)
    }
}

/// `PooledBuffer` 是写路径上“只释放一次”的池化缓冲句柄。
///
/// # 设计动机（Why）
/// - 出站写操作在排空缓冲后必须立即归还内存，而在通道关闭、I/O 失败等路径上则直接丢弃；
///   两条路径都只能发生一次。
/// - 将释放建模为消费 `self` 的 [`free`](Self::free)，二次释放在编译期即被拒绝；
///   释放后继续写出同样无法表达。
///
/// # 架构关系（How）
/// - `released` 标记回收是否已发生：`free` 回收后置位，随后 `Drop` 看到标记即不再回收；
/// - 未经 `free` 的句柄在 `Drop` 中以 [`ReleaseKind::Discarded`] 回收，保证每个租约恰好一次回收；
/// - 读侧实现 [`bytes::Buf`]，写路径以 `chunk`/`advance` 推进剩余字节。
///
/// # 契约说明（What）
/// - **构造前置条件**：`inner` 为独占所有权的新缓冲；`recycler` 生命周期不短于缓冲；
/// - **调用后置条件**：`remaining` 始终反映尚未写出的字节数；`freeze` 后不再接受追加写入。
///
/// # 风险与取舍（Trade-offs）
/// - 冻结后若外部仍持有 `Bytes` 别名，`free` 无法夺回 `BytesMut`，池只能更新统计，
///   下次租借时重新分配。
pub struct PooledBuffer {
    state: BufferState,
    capacity: usize,
    released: bool,
    recycler: Arc<dyn BufferRecycler>,
}

impl PooledBuffer {
    /// 使用给定的 `BytesMut` 与回收句柄创建缓冲。
    ///
    /// # 参数
    /// - `inner`：池分配的可写缓冲；
    /// - `recycler`：池级回收句柄，通常为 `Arc<PoolInner>` 或其轻量代理。
    pub fn new(inner: BytesMut, recycler: Arc<dyn BufferRecycler>) -> Self {
        Self {
            capacity: inner.capacity(),
            state: BufferState::Writable(inner),
            released: false,
            recycler,
        }
    }

    /// 追加写入字节；已冻结的缓冲返回 `false` 且不做任何修改。
    pub fn put_slice(&mut self, src: &[u8]) -> bool {
        let BufferState::Writable(buf) = &mut self.state else {
            return false;
        };
        buf.put_slice(src);
        let capacity = buf.capacity();
        self.capacity = self.capacity.max(capacity);
        true
    }

    /// 冻结为只读视图，之后只允许读取。重复冻结为空操作。
    pub fn freeze(&mut self) {
        if let BufferState::Writable(buf) = &mut self.state {
            let frozen = buf.split().freeze();
            self.state = BufferState::ReadOnly(frozen);
        }
    }

    /// 是否仍处于可写状态。
    pub fn is_writable(&self) -> bool {
        matches!(self.state, BufferState::Writable(_))
    }

    /// 租约记录的容量。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 尚未写出的字节数。
    pub fn remaining_bytes(&self) -> usize {
        self.state.len()
    }

    /// 是否仍有待写出的字节。
    pub fn has_remaining_bytes(&self) -> bool {
        self.remaining_bytes() > 0
    }

    /// 释放缓冲并将底层内存交还池。
    ///
    /// # 契约（What）
    /// - 消费句柄：同一缓冲不可能被释放两次；
    /// - 回收器收到一次 [`ReleaseKind::Freed`]，若能夺回所有权则附带清空后的 `BytesMut`。
    pub fn free(mut self) {
        self.released = true;
        let state = mem::replace(&mut self.state, BufferState::ReadOnly(Bytes::new()));
        self.recycler.reclaim(ReclaimedBuffer::new(
            self.capacity,
            ReleaseKind::Freed,
            state.into_reusable(self.capacity),
        ));
    }
}

impl Buf for PooledBuffer {
    fn remaining(&self) -> usize {
        self.remaining_bytes()
    }

    fn chunk(&self) -> &[u8] {
        self.state.chunk()
    }

    fn advance(&mut self, cnt: usize) {
        let remaining = self.remaining_bytes();
        assert!(
            cnt <= remaining,
            "PooledBuffer::advance 超出剩余可读字节：请求 {cnt}，实际 {remaining}"
        );
        self.state.advance(cnt);
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        // `free` 已回收时不再回收；否则视为丢弃，内存不回到自由链表。
        if !self.released {
            self.released = true;
            tracing::trace!(
                capacity = self.capacity,
                remaining = self.state.len(),
                "pooled buffer discarded without free"
            );
            self.recycler.reclaim(ReclaimedBuffer::new(
                self.capacity,
                ReleaseKind::Discarded,
                None,
            ));
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("remaining", &self.state.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
