//! Time-range tokens.
//!
//! Every read path accepts a compact range token: `"all"` for the full
//! history, or a count with an `h`/`d`/`w` suffix for a window reaching
//! back from the current instant.

use time::{Duration, OffsetDateTime};
use tracing::warn;

/// Window applied when a token cannot be parsed.
const DEFAULT_WINDOW: Duration = Duration::days(3);

/// Parse a range token into the earliest instant a query should include.
///
/// `"all"` means no lower bound. `"<n>h"`, `"<n>d"` and `"<n>w"` subtract
/// that many hours, days or weeks from `now`. Malformed tokens degrade to
/// a three-day window rather than failing the request.
pub fn parse_range(token: &str, now: OffsetDateTime) -> Option<OffsetDateTime> {
    if token == "all" {
        return None;
    }

    match parse_window(token, now) {
        Some(cutoff) => Some(cutoff),
        None => {
            warn!("Invalid time range {token:?}, defaulting to 3 days");
            Some(now - DEFAULT_WINDOW)
        }
    }
}

fn parse_window(token: &str, now: OffsetDateTime) -> Option<OffsetDateTime> {
    let (digits, seconds_per_unit) = if let Some(digits) = token.strip_suffix('h') {
        (digits, 3_600)
    } else if let Some(digits) = token.strip_suffix('d') {
        (digits, 86_400)
    } else if let Some(digits) = token.strip_suffix('w') {
        (digits, 604_800)
    } else {
        return None;
    };

    let count: i64 = digits.parse().ok()?;
    let window = Duration::seconds(count.checked_mul(seconds_per_unit)?);
    now.checked_sub(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-06-01 12:00:00 UTC);

    #[test]
    fn test_all_has_no_cutoff() {
        assert_eq!(parse_range("all", NOW), None);
    }

    #[test]
    fn test_hours() {
        assert_eq!(parse_range("6h", NOW), Some(NOW - Duration::hours(6)));
    }

    #[test]
    fn test_days() {
        assert_eq!(parse_range("1d", NOW), Some(NOW - Duration::days(1)));
        assert_eq!(parse_range("30d", NOW), Some(NOW - Duration::days(30)));
    }

    #[test]
    fn test_weeks() {
        assert_eq!(parse_range("2w", NOW), Some(NOW - Duration::weeks(2)));
    }

    #[test]
    fn test_malformed_tokens_default_to_three_days() {
        let fallback = Some(NOW - Duration::days(3));
        assert_eq!(parse_range("", NOW), fallback);
        assert_eq!(parse_range("d", NOW), fallback);
        assert_eq!(parse_range("10x", NOW), fallback);
        assert_eq!(parse_range("ten days", NOW), fallback);
        assert_eq!(parse_range("7dd", NOW), fallback);
    }

    #[test]
    fn test_overflowing_window_defaults() {
        assert_eq!(
            parse_range("9223372036854775807h", NOW),
            Some(NOW - Duration::days(3))
        );
    }

    #[test]
    fn test_same_inputs_same_cutoff() {
        assert_eq!(parse_range("12h", NOW), parse_range("12h", NOW));
    }

    proptest! {
        #[test]
        fn parse_range_never_panics(token in ".*") {
            let _ = parse_range(&token, NOW);
        }

        #[test]
        fn well_formed_tokens_parse_exactly(count in 1i64..10_000, unit in "[hdw]") {
            let token = format!("{count}{unit}");
            let expected = match unit.as_str() {
                "h" => Duration::hours(count),
                "d" => Duration::days(count),
                _ => Duration::weeks(count),
            };
            prop_assert_eq!(parse_range(&token, NOW), Some(NOW - expected));
        }
    }
}
