//! 单次完成令牌。
//!
//! # 教案式综述
//! - **意图 (Why)**：每个逻辑出站操作的完成信号必须恰好触发一次。把回调封装为按值消费的令牌，
//!   “触发两次”在正常路径上无法表达；
//! - **结构 (How)**：令牌与 [`CompletionFuse`] 共享同一个单次槽位。分发包装器在把令牌交给处理器之前
//!   先取出保险丝，处理器失败时由保险丝补发完成信号；
//! - **契约 (What)**：槽位只会被触发一次。令牌在槽位已被保险丝触发后再调用
//!   [`CompletionToken::complete`]，得到 [`CompletionError::AlreadyCompleted`] 并记录 `error` 日志。

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use spin::Mutex;

use crate::error::CompletionError;

type Callback = Box<dyn FnOnce() + Send>;

struct Slot {
    fired: AtomicBool,
    callback: Mutex<Option<Callback>>,
}

impl Slot {
    /// 抢占槽位并执行回调；槽位已触发时返回 `false`。
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // 回调在锁外执行，回调内部再次触及同一槽位不会自锁。
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// 恰好触发一次的完成令牌。
///
/// # 契约说明（What）
/// - [`complete`](Self::complete) 消费令牌，同一令牌不可能被调用两次；
/// - 未触发即被丢弃时记录 `warn` 日志，槽位保持待触发状态，仍可由 [`CompletionFuse`] 补发。
pub struct CompletionToken {
    slot: Option<Arc<Slot>>,
}

impl CompletionToken {
    /// 以回调创建令牌。
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            slot: Some(Arc::new(Slot {
                fired: AtomicBool::new(false),
                callback: Mutex::new(Some(Box::new(callback))),
            })),
        }
    }

    /// 取出共享同一槽位的保险丝。
    pub fn fuse(&self) -> CompletionFuse {
        CompletionFuse {
            slot: self.slot.clone(),
        }
    }

    /// 槽位是否尚未被触发。
    pub fn is_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| !slot.is_fired())
    }

    /// 触发完成回调。
    ///
    /// 槽位已由保险丝触发时返回 [`CompletionError::AlreadyCompleted`]，这是调用方的逻辑错误。
    pub fn complete(mut self) -> Result<(), CompletionError> {
        let Some(slot) = self.slot.take() else {
            return Err(CompletionError::AlreadyCompleted);
        };
        if slot.fire() {
            Ok(())
        } else {
            tracing::error!("completion fired more than once for the same operation");
            Err(CompletionError::AlreadyCompleted)
        }
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take()
            && !slot.is_fired()
        {
            tracing::warn!("completion token dropped without firing");
        }
    }
}

impl fmt::Debug for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionToken")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// 与令牌共享槽位的保险丝，只在槽位尚未触发时补发完成信号。
#[derive(Clone)]
pub struct CompletionFuse {
    slot: Option<Arc<Slot>>,
}

impl CompletionFuse {
    /// 槽位尚未触发时触发它并返回 `true`，否则返回 `false`。
    pub fn fire_if_pending(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.fire())
    }

    pub fn is_fired(&self) -> bool {
        self.slot.as_ref().is_none_or(|slot| slot.is_fired())
    }
}

impl fmt::Debug for CompletionFuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionFuse")
            .field("fired", &self.is_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting() -> (CompletionToken, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        let token = CompletionToken::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        (token, count)
    }

    #[test]
    fn complete_fires_callback_once() {
        let (token, count) = counting();
        let fuse = token.fuse();
        assert!(token.is_pending());
        token.complete().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(fuse.is_fired());
        assert!(!fuse.fire_if_pending());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fuse_fires_dropped_token() {
        let (token, count) = counting();
        let fuse = token.fuse();
        drop(token);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(fuse.fire_if_pending());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completing_after_fuse_is_a_detectable_error() {
        let (token, count) = counting();
        assert!(token.fuse().fire_if_pending());
        assert!(!token.is_pending());
        assert_eq!(token.complete(), Err(CompletionError::AlreadyCompleted));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
