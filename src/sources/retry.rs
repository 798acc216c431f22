use super::{BarSource, SourceError};
use crate::{Bar, SeriesKey, StopHandle, Symbol};
use async_trait::async_trait;
use std::time::Duration;

/// Backoff parameters for [`Retry`]. The delay before attempt `n + 1` is
/// `base_delay * 2^n`, capped at `max_delay`. Once `max_attempts` attempts
/// in a row have come back without data the wrapper reports the outage and
/// keeps retrying at `max_delay` pacing; it never gives up on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// No delays and no escalation threshold. Keeps test runs instant.
    pub fn immediate() -> Self {
        RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts: None,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Clamp the shift so the multiplier itself cannot overflow.
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .checked_mul(factor)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

/// The Retry source is a middleware that absorbs transient provider
/// failures. Errors and empty results are retried with exponential backoff
/// until data arrives or stop is requested, so callers only ever see data
/// or shutdown.
pub struct Retry<S>
where
    S: BarSource,
{
    source: S,
    policy: RetryPolicy,
    stop: StopHandle,
}

impl<S> Retry<S>
where
    S: BarSource,
{
    pub fn new(source: S, policy: RetryPolicy, stop: StopHandle) -> Self {
        Retry {
            source,
            policy,
            stop,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sleep out the backoff for `attempt`, abandoning the wait as soon as
    /// stop is requested.
    async fn backoff(&self, attempt: u32) -> Result<(), SourceError> {
        if self.stop.is_stopped() {
            return Err(SourceError::Interrupted);
        }
        tokio::select! {
            _ = self.stop.wait() => Err(SourceError::Interrupted),
            _ = tokio::time::sleep(self.policy.delay_for(attempt)) => Ok(()),
        }
    }

    fn escalate(&self, key: SeriesKey, attempt: u32) {
        if let Some(max_attempts) = self.policy.max_attempts {
            if attempt + 1 == max_attempts {
                log::error!(
                    "Still no data for {} after {} attempts, continuing at {:?} backoff.",
                    key,
                    max_attempts,
                    self.policy.max_delay
                );
            }
        }
    }
}

#[async_trait]
impl<S: BarSource> BarSource for Retry<S> {
    const NAME: &'static str = S::NAME;

    fn format_symbol(&self, symbol: Symbol) -> String {
        self.source.format_symbol(symbol)
    }

    async fn fetch_latest(&self, key: SeriesKey) -> Result<Option<Bar>, SourceError> {
        let mut attempt = 0u32;
        loop {
            if self.stop.is_stopped() {
                return Err(SourceError::Interrupted);
            }
            match self.source.fetch_latest(key).await {
                Ok(Some(bar)) => return Ok(Some(bar)),
                Ok(None) => log::debug!("No bars for {} yet, retrying.", key),
                Err(SourceError::Interrupted) => return Err(SourceError::Interrupted),
                Err(err) => log::warn!("Fetching the latest bar for {} failed: {}", key, err),
            }
            self.escalate(key, attempt);
            self.backoff(attempt).await?;
            attempt = attempt.saturating_add(1);
        }
    }

    async fn fetch_window(&self, key: SeriesKey, count: usize) -> Result<Vec<Bar>, SourceError> {
        let mut attempt = 0u32;
        loop {
            if self.stop.is_stopped() {
                return Err(SourceError::Interrupted);
            }
            match self.source.fetch_window(key, count).await {
                Ok(bars) if bars.is_empty() => log::debug!("No bars for {} yet, retrying.", key),
                Ok(bars) => return Ok(bars),
                Err(SourceError::Interrupted) => return Err(SourceError::Interrupted),
                Err(err) => log::warn!("Fetching a bar window for {} failed: {}", key, err),
            }
            self.escalate(key, attempt);
            self.backoff(attempt).await?;
            attempt = attempt.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sources::{Mock, Step},
        Timeframe,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar_at(secs: i64) -> Bar {
        Bar {
            open_time: Utc.timestamp_opt(secs, 0).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(90),
            close: dec!(105),
            volume: dec!(1),
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(31), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn masks_failures() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M1);
        let mock = Mock::new();
        mock.script(key, vec![Step::Fail, Step::Fail, Step::Bar(bar_at(60))]);

        let retry = Retry::new(mock, RetryPolicy::immediate(), StopHandle::new());
        let fetched = retry.fetch_latest(key).await.unwrap();

        assert_eq!(fetched, Some(bar_at(60)));
        assert_eq!(retry.source.latest_calls(key), 3);
    }

    #[tokio::test]
    async fn empty_is_retried_not_surfaced() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M1);
        let mock = Mock::new();
        mock.script(key, vec![Step::Empty, Step::Empty, Step::Bar(bar_at(120))]);

        let retry = Retry::new(mock, RetryPolicy::immediate(), StopHandle::new());
        let fetched = retry.fetch_latest(key).await.unwrap();

        assert_eq!(fetched, Some(bar_at(120)));
        assert_eq!(retry.source.latest_calls(key), 3);
    }

    #[tokio::test]
    async fn keeps_trying_past_escalation() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M1);
        let mock = Mock::new();
        mock.script(
            key,
            vec![
                Step::Fail,
                Step::Fail,
                Step::Fail,
                Step::Fail,
                Step::Bar(bar_at(180)),
            ],
        );

        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_attempts: Some(2),
        };
        let retry = Retry::new(mock, policy, StopHandle::new());
        let fetched = retry.fetch_latest(key).await.unwrap();

        assert_eq!(fetched, Some(bar_at(180)));
        assert_eq!(retry.source.latest_calls(key), 5);
    }

    #[tokio::test]
    async fn stop_interrupts_before_fetch() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M1);
        let mock = Mock::new();
        mock.script(key, vec![Step::Bar(bar_at(60))]);

        let stop = StopHandle::new();
        stop.stop();
        let retry = Retry::new(mock, RetryPolicy::immediate(), stop);

        assert!(matches!(
            retry.fetch_latest(key).await,
            Err(SourceError::Interrupted)
        ));
        assert_eq!(retry.source.latest_calls(key), 0);
    }

    #[tokio::test]
    async fn stop_interrupts_backoff() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M1);
        let mock = Mock::new();
        mock.script(key, vec![Step::Fail]);

        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        };
        let stop = StopHandle::new();
        let retry = Retry::new(mock, policy, stop.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop.stop();
        });

        assert!(matches!(
            retry.fetch_latest(key).await,
            Err(SourceError::Interrupted)
        ));
        trigger.await.unwrap();
    }

    #[tokio::test]
    async fn window_fetch_passes_through() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M5);
        let mock = Mock::new();
        mock.window(key, vec![bar_at(0), bar_at(300)]);

        let retry = Retry::new(mock, RetryPolicy::immediate(), StopHandle::new());
        let window = retry.fetch_window(key, 2).await.unwrap();

        assert_eq!(window, vec![bar_at(0), bar_at(300)]);
    }
}
