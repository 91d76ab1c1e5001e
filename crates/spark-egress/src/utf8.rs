//! 增量 UTF-8 校验器。
//!
//! # 教案式综述
//! - **意图 (Why)**：文本帧的载荷可能被拆成任意多次写入，切分点可以落在多字节码点中间，
//!   校验器必须跨调用保留未完成序列，而不是把它过早判为非法；
//! - **逻辑 (How)**：
//!   1. 没有未完成序列时，先成段跳过 ASCII，再按首字节确定序列长度与最小码点；
//!   2. 每个续字节并入码点累加器后立即做区间检查（过长编码、代理区、超出 `U+10FFFF`），
//!      非法序列在能够判定的最早字节处被拒绝；
//!   3. 任何失败都使校验器永久失败，之后的输入一律返回 [`Utf8ErrorKind::AlreadyFailed`]；
//! - **契约 (What)**：
//!   - 同一字节流无论如何切分，`feed` 的接受/拒绝结论与一次性校验相同；
//!   - `finish` 时仍有未完成序列即判为 [`Utf8ErrorKind::Incomplete`]；
//!   - 错误偏移为出错字节在整条消息中的绝对位置。

use crate::error::{Utf8Error, Utf8ErrorKind};

const MAX_CODE_POINT: u32 = 0x10_FFFF;
const SURROGATE_MIN: u32 = 0xD800;
const SURROGATE_MAX: u32 = 0xDFFF;

/// 增量 UTF-8 校验器。
///
/// 状态仅包含未完成序列的原始字节（至多 3 个）、剩余续字节数与码点累加器，
/// 克隆成本极低，帧写出器借此做“先在副本上校验，写出成功后再提交”的推测式校验。
#[derive(Clone, Debug, Default)]
pub struct Utf8Validator {
    pending: [u8; 3],
    pending_len: u8,
    /// 当前序列尚缺的续字节数；0 表示没有未完成序列。
    needed: u8,
    code_point: u32,
    min_code_point: u32,
    consumed: u64,
    last_code_point: Option<char>,
    failure: Option<Utf8Error>,
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 校验下一段字节。
    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), Utf8Error> {
        if let Some(failure) = self.failure {
            return Err(Utf8Error::new(failure.offset(), Utf8ErrorKind::AlreadyFailed));
        }
        let mut index = 0;
        while index < bytes.len() {
            if self.needed == 0 {
                let run = bytes[index..]
                    .iter()
                    .take_while(|byte| byte.is_ascii())
                    .count();
                if run > 0 {
                    index += run;
                    self.consumed += run as u64;
                    self.last_code_point = Some(char::from(bytes[index - 1]));
                    continue;
                }
            }
            self.step(bytes[index])?;
            index += 1;
        }
        Ok(())
    }

    /// 声明消息结束：仍有未完成序列时失败。
    pub fn finish(&mut self) -> Result<(), Utf8Error> {
        if let Some(failure) = self.failure {
            return Err(Utf8Error::new(failure.offset(), Utf8ErrorKind::AlreadyFailed));
        }
        if self.needed > 0 {
            let start = self.consumed - u64::from(self.pending_len);
            return Err(self.fail(start, Utf8ErrorKind::Incomplete));
        }
        Ok(())
    }

    /// 是否已永久失败。
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// 是否停在码点边界上（没有未完成序列）。
    pub fn is_at_boundary(&self) -> bool {
        self.needed == 0
    }

    /// 当前缓存的未完成序列字节。
    pub fn pending(&self) -> &[u8] {
        &self.pending[..usize::from(self.pending_len)]
    }

    /// 最近一个完整解码的码点。
    pub fn last_code_point(&self) -> Option<char> {
        self.last_code_point
    }

    /// 已通过校验的字节总数。
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    fn step(&mut self, byte: u8) -> Result<(), Utf8Error> {
        let offset = self.consumed;
        if self.needed == 0 {
            let (needed, bits, min) = match byte {
                0xC0 | 0xC1 => return Err(self.fail(offset, Utf8ErrorKind::Overlong)),
                0xC2..=0xDF => (1, byte & 0x1F, 0x80),
                0xE0..=0xEF => (2, byte & 0x0F, 0x800),
                0xF0..=0xF4 => (3, byte & 0x07, 0x1_0000),
                0xF5..=0xF7 => return Err(self.fail(offset, Utf8ErrorKind::OutOfRange)),
                _ => return Err(self.fail(offset, Utf8ErrorKind::InvalidLeadByte)),
            };
            self.needed = needed;
            self.code_point = u32::from(bits);
            self.min_code_point = min;
            self.pending[0] = byte;
            self.pending_len = 1;
            self.consumed += 1;
            return Ok(());
        }

        if byte & 0xC0 != 0x80 {
            return Err(self.fail(offset, Utf8ErrorKind::InvalidContinuation));
        }
        self.code_point = (self.code_point << 6) | u32::from(byte & 0x3F);
        self.needed -= 1;
        // 剩余续字节可取任意值，把三条边界右移到同一精度即可提前判定。
        let shift = 6 * u32::from(self.needed);
        let partial = self.code_point;
        if partial < self.min_code_point >> shift {
            return Err(self.fail(offset, Utf8ErrorKind::Overlong));
        }
        if partial > MAX_CODE_POINT >> shift {
            return Err(self.fail(offset, Utf8ErrorKind::OutOfRange));
        }
        if (SURROGATE_MIN >> shift..=SURROGATE_MAX >> shift).contains(&partial) && shift < 12 {
            return Err(self.fail(offset, Utf8ErrorKind::Surrogate));
        }
        self.consumed += 1;
        if self.needed == 0 {
            self.last_code_point = char::from_u32(self.code_point);
            self.pending_len = 0;
            self.code_point = 0;
        } else {
            self.pending[usize::from(self.pending_len)] = byte;
            self.pending_len += 1;
        }
        Ok(())
    }

    fn fail(&mut self, offset: u64, kind: Utf8ErrorKind) -> Utf8Error {
        let error = Utf8Error::new(offset, kind);
        self.failure = Some(error);
        self.needed = 0;
        self.pending_len = 0;
        self.code_point = 0;
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reject(bytes: &[u8]) -> Utf8Error {
        let mut validator = Utf8Validator::new();
        validator.feed(bytes).unwrap_err()
    }

    #[test]
    fn euro_sign_split_across_three_calls() {
        let mut validator = Utf8Validator::new();
        validator.feed(&[0xE2]).unwrap();
        assert_eq!(validator.pending(), &[0xE2]);
        validator.feed(&[0x82]).unwrap();
        assert_eq!(validator.pending(), &[0xE2, 0x82]);
        validator.feed(&[0xAC]).unwrap();
        assert!(validator.is_at_boundary());
        assert_eq!(validator.last_code_point(), Some('\u{20AC}'));
        validator.finish().unwrap();
    }

    #[test]
    fn invalid_continuation_rejected_at_second_byte() {
        let err = reject(&[0xE2, 0x28, 0xA1]);
        assert_eq!(err.offset(), 1);
        assert_eq!(err.kind(), Utf8ErrorKind::InvalidContinuation);
    }

    #[test]
    fn overlong_surrogate_and_range_are_rejected_early() {
        let cases: [(&[u8], u64, Utf8ErrorKind); 7] = [
            (&[0xC0, 0xAF], 0, Utf8ErrorKind::Overlong),
            (&[0xE0, 0x80, 0xAF], 1, Utf8ErrorKind::Overlong),
            (&[0xF0, 0x80, 0x80, 0xAF], 1, Utf8ErrorKind::Overlong),
            (&[0xED, 0xA0, 0x80], 1, Utf8ErrorKind::Surrogate),
            (&[0xF4, 0x90, 0x80, 0x80], 1, Utf8ErrorKind::OutOfRange),
            (&[0xF5, 0x80, 0x80, 0x80], 0, Utf8ErrorKind::OutOfRange),
            (&[b'a', 0x80], 1, Utf8ErrorKind::InvalidLeadByte),
        ];
        for (bytes, offset, kind) in cases {
            let err = reject(bytes);
            assert_eq!((err.offset(), err.kind()), (offset, kind), "{bytes:02X?}");
        }
    }

    #[test]
    fn boundary_code_points_are_accepted() {
        let text = "\u{7F}\u{80}\u{7FF}\u{800}\u{D7FF}\u{E000}\u{FFFF}\u{10000}\u{10FFFF}";
        let mut validator = Utf8Validator::new();
        validator.feed(text.as_bytes()).unwrap();
        validator.finish().unwrap();
        assert_eq!(validator.last_code_point(), Some('\u{10FFFF}'));
        assert_eq!(validator.consumed(), text.len() as u64);
    }

    #[test]
    fn truncated_sequence_fails_at_finish() {
        let mut validator = Utf8Validator::new();
        validator.feed(b"ok").unwrap();
        validator.feed(&[0xE2, 0x82]).unwrap();
        let err = validator.finish().unwrap_err();
        assert_eq!(err.kind(), Utf8ErrorKind::Incomplete);
        assert_eq!(err.offset(), 2);
        assert!(validator.is_failed());
    }

    #[test]
    fn failure_is_permanent() {
        let mut validator = Utf8Validator::new();
        validator.feed(&[0xFF]).unwrap_err();
        let err = validator.feed(b"plain ascii").unwrap_err();
        assert_eq!(err.kind(), Utf8ErrorKind::AlreadyFailed);
        assert_eq!(err.offset(), 0);
        assert_eq!(
            validator.finish().unwrap_err().kind(),
            Utf8ErrorKind::AlreadyFailed
        );
    }
}
