use spark_transport::SinkChannel;

use super::{FrameSink, FrameType, PayloadValidator};
use crate::{
    config::EgressConfig,
    error::Utf8Error,
    utf8::Utf8Validator,
};

impl PayloadValidator for Utf8Validator {
    fn validate(&mut self, bytes: &[u8]) -> Result<(), Utf8Error> {
        self.feed(bytes)
    }

    fn finish(&mut self) -> Result<(), Utf8Error> {
        Utf8Validator::finish(self)
    }

    fn is_active(&self) -> bool {
        true
    }
}

/// 文本帧写出器：可选的 UTF-8 校验器组合在普通帧写出器之上。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 文本帧载荷必须是合法 UTF-8，但校验是否开启属于构造期决策，例如可信内部流量可以关闭；
/// - 校验器随写出器走完整条消息：分片消息通过 [`FrameSink::finish_fragment`] 交出校验器，
///   再由 [`FrameSink::continuation`] 接续，因此跨帧的多字节码点同样能被正确判定。
///
/// ## 契约（What）
/// - `check_utf8 = false` 时校验器为 `None`，写出器退化为直通路径；
/// - 校验器状态只属于当前写出器实例，不在通道之间共享。
impl<C: SinkChannel> FrameSink<C, Option<Utf8Validator>> {
    /// 创建文本帧写出器。
    pub fn text(channel: C, payload_size: u64, check_utf8: bool) -> Self {
        let validator = check_utf8.then(Utf8Validator::new);
        Self::with_validator(channel, FrameType::Text, payload_size, validator)
    }

    /// 按配置创建文本帧写出器：是否校验与中转块大小取自 `config`。
    pub fn text_with_config(channel: C, payload_size: u64, config: &EgressConfig) -> Self {
        Self::text(channel, payload_size, config.validate_utf8)
            .with_transfer_buffer_size(config.transfer_buffer_size)
    }

    /// 是否启用了 UTF-8 校验。
    pub fn is_utf8_checked(&self) -> bool {
        self.validator().is_some()
    }
}
