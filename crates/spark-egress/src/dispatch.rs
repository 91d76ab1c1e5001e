//! 异常安全的处理器分发。
//!
//! # 教案式综述
//! - **意图 (Why)**：处理器逻辑由业务编写，可能返回错误，也可能直接 panic。无论哪种失败，
//!   连接上的完成信号都必须最终触发且只触发一次，否则调用方会永远等待；
//! - **逻辑 (How)**：
//!   1. 在把完成令牌交给处理器前取出 [`CompletionFuse`]；
//!   2. 以 `catch_unwind` 执行处理器，返回 `Err` 与 panic 同样视为失败；
//!   3. 失败时记录 `error` 日志、尝试写入 5xx 响应码，再用保险丝补发完成信号；
//!      恢复过程中的错误与 panic 一律吞掉；
//! - **契约 (What)**：`execute` 永不 panic、永不返回错误；处理器正常返回时不做任何额外动作，
//!   完成信号由处理器自己负责。

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    completion::{CompletionFuse, CompletionToken},
    config::EgressConfig,
};

/// 处理器可见的服务端交换对象。
pub trait ServerExchange {
    /// 设置响应状态码；响应头已发出等情况下可以失败。
    fn set_response_code(&mut self, code: u16) -> anyhow::Result<()>;
}

/// 请求处理逻辑。
pub trait HttpHandler<X: ?Sized> {
    fn handle(&self, exchange: &mut X, completion: CompletionToken) -> anyhow::Result<()>;
}

impl<X: ?Sized, F> HttpHandler<X> for F
where
    F: Fn(&mut X, CompletionToken) -> anyhow::Result<()>,
{
    fn handle(&self, exchange: &mut X, completion: CompletionToken) -> anyhow::Result<()> {
        self(exchange, completion)
    }
}

/// 携带失败响应码的分发器。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerExecutor {
    error_status: u16,
}

impl Default for HandlerExecutor {
    fn default() -> Self {
        Self { error_status: 500 }
    }
}

impl HandlerExecutor {
    pub fn new(error_status: u16) -> Self {
        Self { error_status }
    }

    pub fn from_config(config: &EgressConfig) -> Self {
        Self::new(config.server_error_status)
    }

    pub fn error_status(&self) -> u16 {
        self.error_status
    }

    /// 执行处理器，保证失败时完成信号仍被触发且只触发一次。
    pub fn execute<X, H>(&self, handler: &H, exchange: &mut X, completion: CompletionToken)
    where
        X: ServerExchange + ?Sized,
        H: HttpHandler<X> + ?Sized,
    {
        let fuse = completion.fuse();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(&mut *exchange, completion)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let error = format!("{err:#}");
                tracing::error!(error = %error, "request handler failed");
                self.recover(exchange, &fuse);
            }
            Err(payload) => {
                tracing::error!(panic = panic_message(&*payload), "request handler panicked");
                swallow(payload);
                self.recover(exchange, &fuse);
            }
        }
    }

    fn recover<X: ServerExchange + ?Sized>(&self, exchange: &mut X, fuse: &CompletionFuse) {
        match panic::catch_unwind(AssertUnwindSafe(|| {
            exchange.set_response_code(self.error_status)
        })) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let error = format!("{err:#}");
                tracing::debug!(error = %error, "failed to set error status");
            }
            Err(payload) => {
                tracing::debug!(
                    panic = panic_message(&*payload),
                    "setting error status panicked"
                );
                swallow(payload);
            }
        }
        match panic::catch_unwind(AssertUnwindSafe(|| fuse.fire_if_pending())) {
            Ok(true) => {}
            Ok(false) => tracing::debug!("completion already fired before handler failed"),
            Err(payload) => {
                tracing::debug!(
                    panic = panic_message(&*payload),
                    "completion callback panicked during recovery"
                );
                swallow(payload);
            }
        }
    }
}

/// 以默认的 500 响应码执行处理器。
pub fn execute_handler<X, H>(handler: &H, exchange: &mut X, completion: CompletionToken)
where
    X: ServerExchange + ?Sized,
    H: HttpHandler<X> + ?Sized,
{
    HandlerExecutor::default().execute(handler, exchange, completion);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// 丢弃 panic 载荷；载荷自身的析构再次 panic 时同样吞掉。
fn swallow(payload: Box<dyn Any + Send>) {
    let _ = panic::catch_unwind(AssertUnwindSafe(move || drop(payload)));
}
