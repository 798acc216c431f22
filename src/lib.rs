#![deny(unused_must_use)]
#![deny(unsafe_code)]
#![allow(clippy::new_without_default)]

mod bar;
mod report;
mod series;
pub mod sources;
pub mod stats;
mod watch;

pub use bar::*;
pub use report::*;
pub use series::*;
pub use watch::*;

use sources::{BarSource, RetryPolicy};
use std::{sync::Arc, time::Duration};

/// Ready-made wiring of the usual stack: a retrying [`Watcher`] over a set
/// of series, feeding a [`Reporter`] built from `plan`. Runs until the
/// reporter's budget, or an outside stop, ends it.
pub struct Vigil {
    pub policy: RetryPolicy,
    pub pacing: Option<Duration>,
}

impl Default for Vigil {
    fn default() -> Self {
        Vigil {
            policy: RetryPolicy::default(),
            pacing: None,
        }
    }
}

impl Vigil {
    pub async fn run<S>(
        self,
        source: S,
        keys: Vec<SeriesKey>,
        plan: ReportPlan,
    ) -> Result<(), AnyError>
    where
        S: BarSource + Clone + 'static,
    {
        let mut watcher = Watcher::with_policy(source.clone(), keys, self.policy)?;
        if let Some(pace) = self.pacing {
            watcher = watcher.with_pacing(pace);
        }

        let reporter = Arc::new(Reporter::new(
            source,
            plan,
            self.policy,
            watcher.stop_handle(),
        )?);
        reporter.prime().await?;
        watcher.subscribe(reporter);
        watcher.start().await;

        Ok(())
    }
}
