//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 出站管线的四类终止错误（对端关闭、I/O 失败、内容校验失败、处理器失败）最终都汇聚到
//!   “强制关闭 + 恰好一次完成”，但内容校验失败必须携带独立信号，
//!   以便上层协议选择 1007 之类的专用关闭码；
//! - 本模块集中定义这些错误，并提供与 `io::Error` 的双向转换。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`；
//! - 校验错误穿越 `io::Error` 边界时以 `InvalidData` 包装，再由 [`EgressError::from_io`] 无损还原。

use std::io;

use thiserror::Error;

/// UTF-8 校验失败的具体原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
pub enum Utf8ErrorKind {
    /// 字节不能作为序列首字节（含孤立的续字节）。
    #[error("invalid lead byte")]
    InvalidLeadByte,
    /// 期望续字节（`10xxxxxx`）却遇到其他字节。
    #[error("invalid continuation byte")]
    InvalidContinuation,
    /// 使用了多于必要长度的编码。
    #[error("overlong encoding")]
    Overlong,
    /// 编码落入代理区 `U+D800..=U+DFFF`。
    #[error("surrogate code point")]
    Surrogate,
    /// 编码超过 `U+10FFFF`。
    #[error("code point above U+10FFFF")]
    OutOfRange,
    /// 消息结束时仍有未完成的多字节序列。
    #[error("incomplete sequence at end of message")]
    Incomplete,
    /// 校验器此前已失败，不再接受任何输入。
    #[error("validator already failed")]
    AlreadyFailed,
}

/// UTF-8 校验错误，`offset` 为出错字节在整个消息字节流中的绝对偏移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error)]
#[error("invalid utf-8 at byte offset {offset}: {kind}")]
pub struct Utf8Error {
    offset: u64,
    kind: Utf8ErrorKind,
}

impl Utf8Error {
    pub fn new(offset: u64, kind: Utf8ErrorKind) -> Self {
        Self { offset, kind }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn kind(&self) -> Utf8ErrorKind {
        self.kind
    }
}

impl From<Utf8Error> for io::Error {
    fn from(err: Utf8Error) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// 连接因错误终止时上层应使用的关闭原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// 载荷内容非法（WebSocket 1007）。
    InvalidPayload,
    /// 违反帧协约，例如载荷长度与声明不符（WebSocket 1002）。
    ProtocolError,
    /// 传输层异常，连接已不可用，不发送关闭帧。
    AbnormalIo,
}

impl CloseReason {
    /// 对应的 WebSocket 关闭码；`AbnormalIo` 无法在线路上发送，返回 `None`。
    pub fn code(self) -> Option<u16> {
        match self {
            CloseReason::InvalidPayload => Some(1007),
            CloseReason::ProtocolError => Some(1002),
            CloseReason::AbnormalIo => None,
        }
    }
}

/// 出站管线错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：帧写出方需要区分“内容非法”与“连接坏了”，前者仍可尝试发送关闭帧，后者只能放弃；
/// - **契约 (What)**：
///   - [`EgressError::is_validation`] 仅对 `InvalidPayload` 返回 `true`；
///   - [`EgressError::close_reason`] 给出上层应选用的关闭原因；
///   - 与 `io::Error` 互转时，非 I/O 变体被整体装箱，`from_io` 可还原原始变体；
/// - **设计权衡 (Trade-offs)**：`Io` 变体保留原始 `io::Error` 而非字符串，代价是类型不可 `Clone`。
#[derive(Debug, Error)]
pub enum EgressError {
    /// 底层通道 I/O 失败。
    #[error("channel i/o failure: {0}")]
    Io(#[source] io::Error),

    /// 写入过程中对端关闭了通道。
    #[error("peer closed the channel")]
    PeerClosed,

    /// 载荷未通过内容校验。
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] Utf8Error),

    /// 写入量超出帧声明的载荷长度。
    #[error("payload overflow: declared {declared} bytes, attempted {attempted}")]
    PayloadOverflow { declared: u64, attempted: u64 },

    /// 结束时写入量少于帧声明的载荷长度。
    #[error("payload underflow: declared {declared} bytes, written {written}")]
    PayloadUnderflow { declared: u64, written: u64 },

    /// 帧写出器已进入终止状态，不再接受任何操作。
    #[error("frame sink no longer accepts payload")]
    SinkFailed,
}

impl EgressError {
    /// 从 `io::Error` 还原：被包装的 [`EgressError`] 或 [`Utf8Error`] 恢复为原变体，其余视为 I/O 失败。
    pub fn from_io(err: io::Error) -> Self {
        let carries_egress = err
            .get_ref()
            .is_some_and(|inner| inner.is::<EgressError>());
        if carries_egress {
            return match err.into_inner().map(|inner| inner.downcast::<EgressError>()) {
                Some(Ok(egress)) => *egress,
                Some(Err(inner)) => EgressError::Io(io::Error::other(inner)),
                None => EgressError::Io(io::Error::other("empty egress error payload")),
            };
        }
        if err.kind() == io::ErrorKind::InvalidData {
            if let Some(utf8) = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<Utf8Error>())
            {
                return EgressError::InvalidPayload(*utf8);
            }
        }
        EgressError::Io(err)
    }

    /// 是否为内容校验失败。
    pub fn is_validation(&self) -> bool {
        matches!(self, EgressError::InvalidPayload(_))
    }

    /// 上层关闭连接时应使用的原因。
    pub fn close_reason(&self) -> CloseReason {
        match self {
            EgressError::InvalidPayload(_) => CloseReason::InvalidPayload,
            EgressError::PayloadOverflow { .. }
            | EgressError::PayloadUnderflow { .. }
            | EgressError::SinkFailed => CloseReason::ProtocolError,
            EgressError::Io(_) | EgressError::PeerClosed => CloseReason::AbnormalIo,
        }
    }
}

impl From<io::Error> for EgressError {
    fn from(err: io::Error) -> Self {
        EgressError::from_io(err)
    }
}

impl From<EgressError> for io::Error {
    fn from(err: EgressError) -> Self {
        let kind = match &err {
            EgressError::Io(_) => None,
            EgressError::PeerClosed => Some(io::ErrorKind::BrokenPipe),
            EgressError::InvalidPayload(_) => Some(io::ErrorKind::InvalidData),
            EgressError::PayloadOverflow { .. }
            | EgressError::PayloadUnderflow { .. }
            | EgressError::SinkFailed => Some(io::ErrorKind::InvalidInput),
        };
        match (kind, err) {
            (None, EgressError::Io(inner)) => inner,
            (Some(kind), err) => io::Error::new(kind, err),
            (None, err) => io::Error::other(err),
        }
    }
}

/// 配置加载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse egress config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid egress config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 完成令牌的逻辑错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// 同一逻辑操作的完成回调已被触发过。
    #[error("completion already fired for this operation")]
    AlreadyCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_error_survives_io_boundary() {
        let original = Utf8Error::new(7, Utf8ErrorKind::Surrogate);
        let io_err: io::Error = original.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        let recovered = EgressError::from_io(io_err);
        assert!(recovered.is_validation());
        assert!(matches!(recovered, EgressError::InvalidPayload(err) if err == original));
    }

    #[test]
    fn egress_error_round_trips_through_io_error() {
        let io_err: io::Error = EgressError::PayloadOverflow {
            declared: 4,
            attempted: 9,
        }
        .into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidInput);
        assert!(matches!(
            EgressError::from_io(io_err),
            EgressError::PayloadOverflow {
                declared: 4,
                attempted: 9
            }
        ));
    }

    #[test]
    fn plain_io_error_stays_io() {
        let err = EgressError::from_io(io::Error::new(io::ErrorKind::InvalidData, "garbage"));
        assert!(matches!(err, EgressError::Io(_)));
        assert_eq!(err.close_reason(), CloseReason::AbnormalIo);
        assert_eq!(err.close_reason().code(), None);
    }

    #[test]
    fn only_validation_failures_map_to_1007() {
        let invalid = EgressError::from(Utf8Error::new(0, Utf8ErrorKind::Overlong));
        assert_eq!(invalid.close_reason().code(), Some(1007));
        assert_eq!(EgressError::SinkFailed.close_reason().code(), Some(1002));
        assert!(!EgressError::PeerClosed.is_validation());
    }
}
