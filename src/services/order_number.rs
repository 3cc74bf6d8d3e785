//! Human-readable order numbers: `ORD-YYYYMMDD-XXXXXXXX`.
//!
//! Generators only propose numbers. Uniqueness is enforced by the unique
//! index on `orders.order_number`; placement retries with a fresh proposal
//! when the insert collides.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const ORDER_NUMBER_PREFIX: &str = "ORD";
const SUFFIX_LEN: usize = 8;

/// Source of candidate order numbers.
pub trait OrderNumberSource: Send + Sync {
    fn next(&self, now: DateTime<Utc>) -> String;
}

/// Date stamp plus 32 random bits rendered as uppercase hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomOrderNumbers;

impl OrderNumberSource for RandomOrderNumbers {
    fn next(&self, now: DateTime<Utc>) -> String {
        let suffix: [u8; 4] = rand::random();
        format_order_number(now, &hex::encode_upper(suffix))
    }
}

/// Replays a fixed list of suffixes, then falls back to random ones.
///
/// Useful wherever deterministic numbering is needed, such as reproducing a
/// collision.
#[derive(Debug, Default)]
pub struct ScriptedOrderNumbers {
    suffixes: Mutex<VecDeque<String>>,
}

impl ScriptedOrderNumbers {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: Mutex::new(suffixes.into_iter().map(Into::into).collect()),
        }
    }
}

impl OrderNumberSource for ScriptedOrderNumbers {
    fn next(&self, now: DateTime<Utc>) -> String {
        let scripted = self
            .suffixes
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        match scripted {
            Some(suffix) => format_order_number(now, &suffix),
            None => RandomOrderNumbers.next(now),
        }
    }
}

pub fn format_order_number(now: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "{}-{}-{}",
        ORDER_NUMBER_PREFIX,
        now.format("%Y%m%d"),
        suffix.to_ascii_uppercase()
    )
}

/// True when `value` matches `ORD-` + 8 digits + `-` + 8 uppercase hex chars.
pub fn is_well_formed(value: &str) -> bool {
    let mut parts = value.splitn(3, '-');
    let (Some(prefix), Some(date), Some(suffix)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    prefix == ORDER_NUMBER_PREFIX
        && date.len() == 8
        && date.chars().all(|c| c.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn random_numbers_are_date_stamped() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        let number = RandomOrderNumbers.next(now);
        assert!(number.starts_with("ORD-20240309-"), "{number}");
        assert!(is_well_formed(&number), "{number}");
    }

    #[test]
    fn scripted_numbers_replay_then_randomise() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let source = ScriptedOrderNumbers::new(["deadbeef", "DEADBEEF"]);
        assert_eq!(source.next(now), "ORD-20240102-DEADBEEF");
        assert_eq!(source.next(now), "ORD-20240102-DEADBEEF");
        let third = source.next(now);
        assert!(is_well_formed(&third));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        for bad in [
            "",
            "ORD-2024010-ABCDEF12",
            "ORD-20240101-abcdef12",
            "ORD-20240101-ABCDEF1",
            "ORD-20240101-ABCDEFGH",
            "INV-20240101-ABCDEF12",
            "ORD-20240101-ABCDEF12-X",
        ] {
            assert!(!is_well_formed(bad), "{bad}");
        }
    }

    proptest! {
        #[test]
        fn any_instant_yields_a_well_formed_number(secs in 0i64..4_102_444_800) {
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            let number = RandomOrderNumbers.next(now);
            prop_assert!(is_well_formed(&number));
            let expected_date = now.format("%Y%m%d").to_string();
            prop_assert_eq!(&number[4..12], expected_date.as_str());
        }
    }
}
