mod kucoin;
mod mock;
mod retry;

pub use kucoin::*;
pub use mock::*;
pub use retry::*;

use std::sync::Arc;
use thiserror::Error;

use crate::{Bar, SeriesKey, Symbol};
use async_trait::async_trait;

/// A remote provider of OHLCV bars. Implementations are unreliable by
/// assumption: any call may fail transiently or come back empty, and callers
/// go through [`Retry`] rather than handling that themselves.
#[async_trait]
pub trait BarSource: Send + Sync {
    const NAME: &'static str;

    /// Custom symbol formatting for each provider.
    fn format_symbol(&self, symbol: Symbol) -> String;
    /// Get the most recent bar of a series, which may still be forming.
    /// `Ok(None)` means the provider has no data yet.
    async fn fetch_latest(&self, key: SeriesKey) -> Result<Option<Bar>, SourceError>;
    /// Get up to `count` most recent bars of a series, oldest first,
    /// including the still-forming bucket when the provider serves one.
    async fn fetch_window(&self, key: SeriesKey, count: usize) -> Result<Vec<Bar>, SourceError>;
}

#[async_trait]
impl<S: BarSource> BarSource for Arc<S> {
    const NAME: &'static str = S::NAME;

    fn format_symbol(&self, symbol: Symbol) -> String {
        self.as_ref().format_symbol(symbol)
    }

    async fn fetch_latest(&self, key: SeriesKey) -> Result<Option<Bar>, SourceError> {
        self.as_ref().fetch_latest(key).await
    }

    async fn fetch_window(&self, key: SeriesKey, count: usize) -> Result<Vec<Bar>, SourceError> {
        self.as_ref().fetch_window(key, count).await
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Could not connect to the data source.")]
    Network,
    #[error("Internal data source error.")]
    Api,
    #[error("Stop was requested while waiting on the data source.")]
    Interrupted,
}
