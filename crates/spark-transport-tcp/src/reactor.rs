use std::io;

use spark_transport::{SinkChannel, safe_close};

use crate::TcpSinkChannel;

/// 在 Tokio 运行时上驱动已登记的写就绪任务，直到没有任务等待。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 写完成驱动器遇到背压时只登记任务并开启写关注，本函数扮演 Reactor：
///   等待套接字可写，取出任务执行一次；
/// - 任务若再次遇到背压会重新登记，循环随之继续。
///
/// ## 契约 (What)
/// - 返回条件：通道已关闭、没有登记任务，或写关注被关闭；
/// - 通道关闭但仍有任务时，任务会被唤醒一次，让其短路到完成回调；
/// - 等待可写本身失败时，先强制关闭通道并唤醒登记的任务，再把错误返回调用方，
///   任务持有的完成信号不会滞留在通道里。
///
/// ## 注意事项 (Trade-offs)
/// - `writable()` 可能出现伪唤醒，任务内部的 `try_write` 会返回 `WouldBlock` 并重新登记，
///   因而循环是安全的。
pub async fn drive_writes(channel: &mut TcpSinkChannel) -> io::Result<()> {
    loop {
        if !channel.has_listener() {
            return Ok(());
        }
        if !channel.is_open() {
            wake_pending(channel);
            return Ok(());
        }
        if !channel.is_write_resumed() {
            return Ok(());
        }
        if let Err(err) = channel.writable().await {
            return Err(abandon(channel, err));
        }
        wake_pending(channel);
    }
}

/// 就绪等待失败：强制关闭通道并唤醒登记的任务，返回原始错误。
fn abandon(channel: &mut TcpSinkChannel, err: io::Error) -> io::Error {
    tracing::warn!(error = %err, "waiting for write readiness failed, force-closing channel");
    safe_close(channel);
    wake_pending(channel);
    err
}

fn wake_pending(channel: &mut TcpSinkChannel) {
    if let Some(listener) = channel.take_write_listener() {
        listener.on_write_ready(channel);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use spark_egress::{CompletionToken, WriteTask};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn readiness_failure_closes_channel_and_fires_pending_completion() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut channel = TcpSinkChannel::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        let completion = CompletionToken::new(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });
        channel.set_write_listener(Box::new(WriteTask::Flush { completion }));
        channel.resume_writes();

        let err = abandon(&mut channel, io::Error::other("readiness poll failed"));

        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!channel.is_open());
        assert!(!channel.has_listener());
        drive_writes(&mut channel).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
