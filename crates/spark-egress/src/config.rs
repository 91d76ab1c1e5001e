use serde::Deserialize;
use spark_transport::DEFAULT_TRANSFER_CHUNK;

use crate::error::ConfigError;

/// 出站管线配置。
///
/// # 教案式注释
///
/// ## 意图（Why）
/// - 文本帧是否默认开启 UTF-8 校验、校验型转移的中转块大小、处理器失败时的响应码，
///   都属于部署期决策，集中在一处加载与校验；
///
/// ## 契约（What）
/// - 所有字段均有默认值，TOML 中缺省的字段取默认；未知字段被拒绝；
/// - `transfer_buffer_size > 0`，`server_error_status ∈ 500..=599`，由 [`EgressConfig::validate`] 保证。
///
/// ## 示例
/// ```toml
/// validate_utf8 = true
/// transfer_buffer_size = 16384
/// server_error_status = 503
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EgressConfig {
    /// 文本帧写出器是否默认启用 UTF-8 校验。
    pub validate_utf8: bool,
    /// 校验型文件/流转移使用的中转块大小。
    pub transfer_buffer_size: usize,
    /// 处理器失败时写入的响应状态码。
    pub server_error_status: u16,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            validate_utf8: true,
            transfer_buffer_size: DEFAULT_TRANSFER_CHUNK,
            server_error_status: 500,
        }
    }
}

impl EgressConfig {
    /// 解析 TOML 文本并校验取值范围。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EgressConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验字段取值。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "transfer_buffer_size",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if !(500..=599).contains(&self.server_error_status) {
            return Err(ConfigError::Invalid {
                field: "server_error_status",
                reason: format!("{} is not a 5xx status", self.server_error_status),
            });
        }
        Ok(())
    }
}
