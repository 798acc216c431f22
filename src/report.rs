use crate::{
    sources::{BarSource, Retry, RetryPolicy, SourceError},
    stats, AnyError, Bar, SeriesKey, StopHandle, Subscriber,
};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures_util::lock::Mutex;
use fxhash::FxHashMap;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Conflicting window definitions for {0}.")]
    ConflictingWindow(SeriesKey),
    #[error("No window declared for {0}.")]
    MissingWindow(SeriesKey),
}

/// How many bars of one series the reporter keeps, and when to refetch them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    key: SeriesKey,
    depth: usize,
    drop_unfinished: bool,
    refresh_on: Vec<SeriesKey>,
}

impl WindowSpec {
    pub fn new(key: SeriesKey, depth: usize) -> Self {
        WindowSpec {
            key,
            depth,
            drop_unfinished: false,
            refresh_on: Vec::new(),
        }
    }

    /// Discard the still-forming bucket: one extra bar is fetched and the
    /// newest one dropped, leaving only closed bars in the window.
    pub fn drop_unfinished(mut self) -> Self {
        self.drop_unfinished = true;
        self
    }

    /// Also refetch this window whenever `key` reports a new bar, on top of
    /// changes of the window's own series.
    pub fn refresh_on(mut self, key: SeriesKey) -> Self {
        self.refresh_on.push(key);
        self
    }
}

/// Which window feeds each statistic of the report line. `range` provides
/// the bars behind the 24h high, low and volume figures.
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs {
    pub price: SeriesKey,
    pub range: SeriesKey,
    pub average: SeriesKey,
}

#[derive(Debug, Clone)]
pub struct ReportPlan {
    pub windows: Vec<WindowSpec>,
    pub inputs: ReportInputs,
    /// Changes of this series produce a printed report line.
    pub report_on: SeriesKey,
    /// After this many handled notifications, whichever series they came
    /// from, the reporter requests a stop. `None` runs until stopped from
    /// outside.
    pub budget: Option<u32>,
}

/// One rendered snapshot of the tracked statistics. Fields without data
/// print as `-`.
#[derive(Debug, Clone)]
pub struct Report {
    pub time: DateTime<Local>,
    pub price: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub average: Option<Decimal>,
    pub average_label: String,
}

fn field(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_owned())
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][current_price={};\t24h-High={};\t24h-Low={};\t24h-Volume={};\t{}={}]",
            self.time.format("%d/%m/%Y %H:%M:%S"),
            field(self.price),
            field(self.high),
            field(self.low),
            field(self.volume),
            self.average_label,
            field(self.average),
        )
    }
}

struct ReporterState {
    data: FxHashMap<SeriesKey, Vec<Bar>>,
    handled: u32,
}

/// A subscriber that keeps the bar windows of a [`ReportPlan`] fresh and
/// prints a report line whenever the plan's `report_on` series advances.
///
/// Refreshes go through its own [`Retry`] around the shared source, wired to
/// the same stop handle as the watcher so a budget-exhausted reporter can
/// end the whole run from inside its callback.
pub struct Reporter<S: BarSource> {
    source: Retry<S>,
    stop: StopHandle,
    windows: Vec<WindowSpec>,
    inputs: ReportInputs,
    report_on: SeriesKey,
    budget: Option<u32>,
    average_label: String,
    state: Mutex<ReporterState>,
}

impl<S: BarSource> Reporter<S> {
    /// Validate `plan` and build the reporter. Identical duplicate windows
    /// collapse; a duplicate with different settings is a hard error, as is
    /// an input naming a series without a window.
    pub fn new(
        source: S,
        plan: ReportPlan,
        policy: RetryPolicy,
        stop: StopHandle,
    ) -> Result<Self, ReportError> {
        let ReportPlan {
            windows,
            inputs,
            report_on,
            budget,
        } = plan;

        let mut deduped: Vec<WindowSpec> = Vec::with_capacity(windows.len());
        for spec in windows {
            match deduped.iter().position(|existing| existing.key == spec.key) {
                Some(i) => {
                    if deduped[i] != spec {
                        return Err(ReportError::ConflictingWindow(spec.key));
                    }
                }
                None => deduped.push(spec),
            }
        }

        for key in [inputs.price, inputs.range, inputs.average] {
            if !deduped.iter().any(|spec| spec.key == key) {
                return Err(ReportError::MissingWindow(key));
            }
        }

        let average_label = deduped
            .iter()
            .filter(|spec| spec.key == inputs.average)
            .map(|spec| format!("{}-SMA({})", spec.key.timeframe, spec.depth))
            .next()
            .unwrap_or_default();

        Ok(Reporter {
            source: Retry::new(source, policy, stop.clone()),
            stop,
            windows: deduped,
            inputs,
            report_on,
            budget,
            average_label,
            state: Mutex::new(ReporterState {
                data: FxHashMap::default(),
                handled: 0,
            }),
        })
    }

    /// Fetch every window once and print the first report line right away.
    /// This priming line does not count against the budget.
    pub async fn prime(&self) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        for spec in &self.windows {
            let bars = self.refresh_window(spec).await?;
            state.data.insert(spec.key, bars);
        }
        println!("{}", self.render(&state.data));
        Ok(())
    }

    /// The bars currently held for a series, oldest first.
    pub async fn snapshot(&self, key: SeriesKey) -> Option<Vec<Bar>> {
        self.state.lock().await.data.get(&key).cloned()
    }

    async fn refresh_window(&self, spec: &WindowSpec) -> Result<Vec<Bar>, SourceError> {
        if spec.drop_unfinished {
            let mut bars = self.source.fetch_window(spec.key, spec.depth + 1).await?;
            bars.pop();
            Ok(bars)
        } else {
            self.source.fetch_window(spec.key, spec.depth).await
        }
    }

    async fn handle(&self, key: SeriesKey) -> Result<(), SourceError> {
        let mut state = self.state.lock().await;
        state.handled += 1;
        let handled = state.handled;

        for spec in &self.windows {
            if spec.key == key || spec.refresh_on.contains(&key) {
                let bars = self.refresh_window(spec).await?;
                state.data.insert(spec.key, bars);
            }
        }

        if key == self.report_on {
            println!("{}", self.render(&state.data));
        }

        if let Some(budget) = self.budget {
            if handled >= budget {
                log::info!("Handled {} notifications, stopping the run.", handled);
                self.stop.stop();
            }
        }

        Ok(())
    }

    fn render(&self, data: &FxHashMap<SeriesKey, Vec<Bar>>) -> Report {
        let empty = Vec::new();
        let price = data.get(&self.inputs.price).unwrap_or(&empty);
        let range = data.get(&self.inputs.range).unwrap_or(&empty);
        let average = data.get(&self.inputs.average).unwrap_or(&empty);

        Report {
            time: Local::now(),
            price: stats::last_close(price),
            high: stats::highest_high(range),
            low: stats::lowest_low(range),
            volume: stats::total_volume(range),
            average: stats::mean_close(average),
            average_label: self.average_label.clone(),
        }
    }
}

#[async_trait]
impl<S: BarSource> Subscriber for Reporter<S> {
    async fn on_new_bar(&self, key: SeriesKey) -> Result<(), AnyError> {
        match self.handle(key).await {
            Ok(()) => Ok(()),
            // Stop during a refresh is a clean shutdown, not a failure.
            Err(SourceError::Interrupted) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
