//! Statistics over a window of bars, oldest first. Every function treats an
//! empty window as "nothing to say" rather than an error.

use crate::Bar;
use rust_decimal::Decimal;

/// Close of the newest bar in the window.
pub fn last_close(bars: &[Bar]) -> Option<Decimal> {
    bars.last().map(|bar| bar.close)
}

/// Highest high across the window.
pub fn highest_high(bars: &[Bar]) -> Option<Decimal> {
    bars.iter().map(|bar| bar.high).max()
}

/// Lowest low across the window.
pub fn lowest_low(bars: &[Bar]) -> Option<Decimal> {
    bars.iter().map(|bar| bar.low).min()
}

/// Summed volume across the window.
pub fn total_volume(bars: &[Bar]) -> Option<Decimal> {
    if bars.is_empty() {
        return None;
    }
    Some(bars.iter().map(|bar| bar.volume).sum())
}

/// Simple moving average of the closes across the window.
pub fn mean_close(bars: &[Bar]) -> Option<Decimal> {
    if bars.is_empty() {
        return None;
    }
    let sum: Decimal = bars.iter().map(|bar| bar.close).sum();
    Some(sum / Decimal::from(bars.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(close: Decimal, high: Decimal, low: Decimal, volume: Decimal) -> Bar {
        Bar {
            open_time: Utc.timestamp_opt(0, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn empty_windows_yield_none() {
        assert_eq!(last_close(&[]), None);
        assert_eq!(highest_high(&[]), None);
        assert_eq!(lowest_low(&[]), None);
        assert_eq!(total_volume(&[]), None);
        assert_eq!(mean_close(&[]), None);
    }

    #[test]
    fn last_close_takes_the_newest_bar() {
        let bars = vec![
            bar(dec!(10), dec!(11), dec!(9), dec!(1)),
            bar(dec!(20), dec!(21), dec!(19), dec!(1)),
        ];
        assert_eq!(last_close(&bars), Some(dec!(20)));
    }

    #[test]
    fn range_and_volume() {
        let bars = vec![
            bar(dec!(10), dec!(15), dec!(8), dec!(2.5)),
            bar(dec!(12), dec!(19.5), dec!(4), dec!(1.5)),
            bar(dec!(11), dec!(13), dec!(9), dec!(3)),
        ];
        assert_eq!(highest_high(&bars), Some(dec!(19.5)));
        assert_eq!(lowest_low(&bars), Some(dec!(4)));
        assert_eq!(total_volume(&bars), Some(dec!(7)));
    }

    #[test]
    fn mean_close_averages_exactly() {
        let bars = vec![
            bar(dec!(1), dec!(1), dec!(1), dec!(1)),
            bar(dec!(2), dec!(2), dec!(2), dec!(1)),
        ];
        assert_eq!(mean_close(&bars), Some(dec!(1.5)));

        let single = vec![bar(dec!(42.42), dec!(43), dec!(42), dec!(1))];
        assert_eq!(mean_close(&single), Some(dec!(42.42)));
    }
}
