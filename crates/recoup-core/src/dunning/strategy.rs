//! Informational risk label attached to new campaigns

use recoup_common::types::Strategy;
use recoup_storage::models::EventCounts;

/// Histories shorter than this are too thin to judge
const MIN_HISTORY: i64 = 3;
/// Amounts at or above this many cents qualify for the premium label
const PREMIUM_AMOUNT_CENTS: i64 = 10_000;

/// Classify a subscription from its payment history and price
pub fn classify(counts: EventCounts, amount_cents: i64) -> Strategy {
    let total = counts.total();
    if total < MIN_HISTORY {
        return Strategy::NewCustomer;
    }

    let success_rate = counts.successes as f64 / total as f64;
    if success_rate >= 0.9 && amount_cents >= PREMIUM_AMOUNT_CENTS {
        Strategy::Premium
    } else if success_rate >= 0.8 {
        Strategy::Standard
    } else if success_rate >= 0.5 {
        Strategy::Cautious
    } else {
        Strategy::HighRisk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn counts(successes: i64, failures: i64) -> EventCounts {
        EventCounts {
            successes,
            failures,
        }
    }

    #[test]
    fn test_classification_table() {
        let cases = [
            (counts(1, 1), 50_000, Strategy::NewCustomer),
            (counts(0, 0), 0, Strategy::NewCustomer),
            (counts(9, 1), 10_000, Strategy::Premium),
            (counts(9, 1), 9_999, Strategy::Standard),
            (counts(8, 2), 50_000, Strategy::Standard),
            (counts(5, 5), 1_000, Strategy::Cautious),
            (counts(4, 6), 1_000, Strategy::HighRisk),
            (counts(0, 3), 1_000, Strategy::HighRisk),
        ];

        for (history, amount, expected) in cases {
            assert_eq!(classify(history, amount), expected, "{:?} {}", history, amount);
        }
    }
}
