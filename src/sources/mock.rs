use super::{BarSource, SourceError};
use crate::{Bar, SeriesKey, Symbol};
use async_trait::async_trait;
use fxhash::FxHashMap;
use std::{collections::VecDeque, sync::Mutex};

/// One scripted response of a [`Mock`] series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Serve this bar as the latest one.
    Bar(Bar),
    /// Report no data yet.
    Empty,
    /// Fail with a network error.
    Fail,
}

#[derive(Default)]
struct Inner {
    scripts: FxHashMap<SeriesKey, VecDeque<Step>>,
    windows: FxHashMap<SeriesKey, Vec<Bar>>,
    latest_calls: FxHashMap<SeriesKey, usize>,
    window_calls: FxHashMap<SeriesKey, usize>,
}

/// The Mock source serves scripted responses instead of talking to a real
/// provider. Each watched series consumes its script one step per
/// `fetch_latest` call and repeats the final step once the script runs out,
/// so a poll loop can keep polling long after the interesting part.
pub struct Mock {
    inner: Mutex<Inner>,
}

impl Mock {
    pub fn new() -> Self {
        Mock {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Set the `fetch_latest` script of a series, replacing any previous one.
    pub fn script(&self, key: SeriesKey, steps: Vec<Step>) {
        self.inner
            .lock()
            .unwrap()
            .scripts
            .insert(key, steps.into());
    }

    /// Set the bars served for `fetch_window` calls on a series, oldest
    /// first. A window fetch returns the newest `count` of them.
    pub fn window(&self, key: SeriesKey, bars: Vec<Bar>) {
        self.inner.lock().unwrap().windows.insert(key, bars);
    }

    /// How many `fetch_latest` calls this series has seen.
    pub fn latest_calls(&self, key: SeriesKey) -> usize {
        *self
            .inner
            .lock()
            .unwrap()
            .latest_calls
            .get(&key)
            .unwrap_or(&0)
    }

    /// How many `fetch_window` calls this series has seen.
    pub fn window_calls(&self, key: SeriesKey) -> usize {
        *self
            .inner
            .lock()
            .unwrap()
            .window_calls
            .get(&key)
            .unwrap_or(&0)
    }
}

#[async_trait]
impl BarSource for Mock {
    const NAME: &'static str = "Mock";

    fn format_symbol(&self, symbol: Symbol) -> String {
        symbol.to_string()
    }

    async fn fetch_latest(&self, key: SeriesKey) -> Result<Option<Bar>, SourceError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.latest_calls.entry(key).or_insert(0) += 1;

        let script = match inner.scripts.get_mut(&key) {
            Some(script) if !script.is_empty() => script,
            _ => panic!("No script configured for {}.", key),
        };
        let step = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            *script.front().unwrap()
        };

        match step {
            Step::Bar(bar) => Ok(Some(bar)),
            Step::Empty => Ok(None),
            Step::Fail => Err(SourceError::Network),
        }
    }

    async fn fetch_window(&self, key: SeriesKey, count: usize) -> Result<Vec<Bar>, SourceError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.window_calls.entry(key).or_insert(0) += 1;

        let bars = match inner.windows.get(&key) {
            Some(bars) => bars,
            None => panic!("No window configured for {}.", key),
        };
        let skip = bars.len().saturating_sub(count);
        Ok(bars[skip..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timeframe;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar_at(secs: i64) -> Bar {
        Bar {
            open_time: Utc.timestamp_opt(secs, 0).unwrap(),
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
        }
    }

    #[tokio::test]
    async fn final_step_repeats() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M1);
        let mock = Mock::new();
        mock.script(key, vec![Step::Bar(bar_at(0)), Step::Bar(bar_at(60))]);

        assert_eq!(mock.fetch_latest(key).await.unwrap(), Some(bar_at(0)));
        assert_eq!(mock.fetch_latest(key).await.unwrap(), Some(bar_at(60)));
        assert_eq!(mock.fetch_latest(key).await.unwrap(), Some(bar_at(60)));
        assert_eq!(mock.latest_calls(key), 3);
    }

    #[tokio::test]
    async fn window_serves_newest_bars() {
        let key = SeriesKey::new("BTC/USDT", Timeframe::M5);
        let mock = Mock::new();
        mock.window(key, vec![bar_at(0), bar_at(300), bar_at(600)]);

        let window = mock.fetch_window(key, 2).await.unwrap();
        assert_eq!(window, vec![bar_at(300), bar_at(600)]);

        let full = mock.fetch_window(key, 10).await.unwrap();
        assert_eq!(full.len(), 3);
        assert_eq!(mock.window_calls(key), 2);
    }
}
