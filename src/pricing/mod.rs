//! Message segmentation and credit pricing.
//!
//! Pure functions only: text -> segment count -> credit cost, and paid
//! amount -> credits for top-ups. Callers are responsible for rejecting
//! zero-segment (empty) sends.

use serde::Deserialize;

/// Characters per GSM-7 segment in a concatenated message.
pub const SEGMENT_CHARS: usize = 153;

/// Count the 153-character segments needed for a message.
///
/// Returns 0 for empty text; callers must treat that as invalid.
pub fn segments_for(text: &str) -> u32 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    chars.div_ceil(SEGMENT_CHARS) as u32
}

/// Pricing policy: how segments and money convert to credits.
///
/// Supplied at construction (config), swapped atomically on reload. Amounts
/// are in minor currency units (cents).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Credits charged per message segment
    #[serde(default = "default_credits_per_segment")]
    pub credits_per_segment: i64,

    /// Minor currency units that buy one credit
    #[serde(default = "default_amount_per_credit")]
    pub amount_per_credit: i64,

    /// Maximum segments per message; longer text is rejected
    #[serde(default = "default_max_segments")]
    pub max_segments: u32,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            credits_per_segment: default_credits_per_segment(),
            amount_per_credit: default_amount_per_credit(),
            max_segments: default_max_segments(),
        }
    }
}

fn default_credits_per_segment() -> i64 {
    1
}

fn default_amount_per_credit() -> i64 {
    100
}

fn default_max_segments() -> u32 {
    10
}

impl PricingPolicy {
    /// Credit cost for a message of `segments` segments.
    pub fn cost_for(&self, segments: u32) -> i64 {
        i64::from(segments) * self.credits_per_segment
    }

    /// Credits bought by a paid amount, rounded down.
    pub fn credits_for_amount(&self, amount: i64) -> i64 {
        if amount <= 0 {
            return 0;
        }
        amount / self.amount_per_credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_is_zero_segments() {
        assert_eq!(segments_for(""), 0);
    }

    #[test]
    fn test_segment_boundaries() {
        assert_eq!(segments_for("a"), 1);
        assert_eq!(segments_for(&"a".repeat(153)), 1);
        assert_eq!(segments_for(&"a".repeat(154)), 2);
        assert_eq!(segments_for(&"a".repeat(306)), 2);
        assert_eq!(segments_for(&"a".repeat(307)), 3);
    }

    #[test]
    fn test_multibyte_counts_chars_not_bytes() {
        let text = "é".repeat(153);
        assert_eq!(segments_for(&text), 1);
    }

    #[test]
    fn test_cost_for() {
        let policy = PricingPolicy {
            credits_per_segment: 2,
            ..Default::default()
        };
        assert_eq!(policy.cost_for(1), 2);
        assert_eq!(policy.cost_for(3), 6);
    }

    #[test]
    fn test_credits_for_amount_rounds_down() {
        let policy = PricingPolicy {
            amount_per_credit: 100,
            ..Default::default()
        };
        assert_eq!(policy.credits_for_amount(100_000), 1000);
        assert_eq!(policy.credits_for_amount(199), 1);
        assert_eq!(policy.credits_for_amount(99), 0);
        assert_eq!(policy.credits_for_amount(-5), 0);
    }
}
