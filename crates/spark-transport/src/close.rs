use crate::SinkChannel;

/// 尽力关闭通道，吞掉关闭过程中的二次错误。
///
/// 错误路径上的强制关闭只追求“通道不再可用”，关闭本身失败时仅以 `debug` 级别记录，
/// 不得掩盖触发关闭的原始错误，也不得阻止完成回调。
pub fn safe_close(channel: &mut dyn SinkChannel) {
    if let Err(err) = channel.close() {
        tracing::debug!(error = %err, "ignored error while force-closing channel");
    }
}
