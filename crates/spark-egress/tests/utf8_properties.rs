//! 增量 UTF-8 校验器的切分无关性。

use proptest::prelude::*;
use spark_egress::{Utf8ErrorKind, Utf8Validator};

/// 按给定切分点把字节流分段喂给校验器，最后声明结束。
fn validate_in_chunks(bytes: &[u8], cuts: &[usize]) -> Result<(), spark_egress::Utf8Error> {
    let mut points: Vec<usize> = cuts.iter().map(|cut| cut % (bytes.len() + 1)).collect();
    points.sort_unstable();
    let mut validator = Utf8Validator::new();
    let mut start = 0;
    for point in points {
        validator.feed(&bytes[start..point])?;
        start = point;
    }
    validator.feed(&bytes[start..])?;
    validator.finish()
}

proptest! {
    #[test]
    fn valid_text_is_accepted_at_every_split_point(text in "\\PC{0,48}") {
        let bytes = text.as_bytes();
        for cut in 0..=bytes.len() {
            let mut validator = Utf8Validator::new();
            prop_assert!(validator.feed(&bytes[..cut]).is_ok());
            prop_assert!(validator.feed(&bytes[cut..]).is_ok());
            prop_assert!(validator.finish().is_ok());
            prop_assert_eq!(validator.last_code_point(), text.chars().last());
        }
    }

    #[test]
    fn chunked_verdict_matches_whole_input(
        bytes in proptest::collection::vec(any::<u8>(), 0..64),
        cuts in proptest::collection::vec(any::<usize>(), 0..6),
    ) {
        let whole = validate_in_chunks(&bytes, &[]);
        let chunked = validate_in_chunks(&bytes, &cuts);
        prop_assert_eq!(whole.is_ok(), std::str::from_utf8(&bytes).is_ok());
        prop_assert_eq!(whole, chunked);
    }

    #[test]
    fn rejection_never_precedes_the_valid_prefix(
        bytes in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        if let Err(std_err) = std::str::from_utf8(&bytes) {
            let err = validate_in_chunks(&bytes, &[]).unwrap_err();
            prop_assert!(err.offset() >= std_err.valid_up_to() as u64);
            prop_assert!(err.offset() < bytes.len() as u64);
            if std_err.error_len().is_none() {
                prop_assert_eq!(err.kind(), Utf8ErrorKind::Incomplete);
            }
        }
    }
}

#[test]
fn three_byte_lead_with_one_continuation_is_incomplete() {
    let mut validator = Utf8Validator::new();
    validator.feed(&[0xE2]).unwrap();
    validator.feed(&[0x82]).unwrap();
    let err = validator.finish().unwrap_err();
    assert_eq!(err.kind(), Utf8ErrorKind::Incomplete);
    assert_eq!(err.offset(), 0);
}
