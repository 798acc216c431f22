mod dispatch;

use dispatch::Dispatcher;
pub use dispatch::{Subscriber, SubscriptionId};

use crate::{
    sources::{BarSource, Retry, RetryPolicy, SourceError},
    SeriesKey,
};
use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::Notify;

pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("The watch set must not be empty.")]
    EmptyWatchSet,
}

/// Cloneable stop signal shared between a [`Watcher`], its retry layer and
/// anyone who wants to shut the run down.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

struct StopInner {
    stopped: AtomicBool,
    wake: Notify,
}

impl StopHandle {
    pub fn new() -> Self {
        StopHandle {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    /// Request the run to stop. Idempotent and non-blocking; safe to call
    /// from any task, including from inside a subscriber callback, where it
    /// takes effect once the current dispatch pass completes.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Wait until stop is requested. Returns immediately if it already was.
    pub async fn wait(&self) {
        let notified = self.inner.wake.notified();
        tokio::pin!(notified);
        // Register before the flag check so a concurrent stop cannot slip
        // between the check and the await.
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}

/// This struct keeps track of the last observed bar boundary of every
/// watched series and notifies subscribers when one advances.
///
/// Detection is strictly-greater on the open time of the latest bar: one
/// notification per new boundary per series, none when the provider repeats
/// or (abnormally) rewinds itself. All fetching goes through [`Retry`], so
/// transient provider trouble delays detection but never ends the run.
pub struct Watcher<S: BarSource> {
    source: Retry<S>,
    keys: Vec<SeriesKey>,
    last_seen: FxHashMap<SeriesKey, DateTime<Utc>>,
    dispatcher: Dispatcher,
    stop: StopHandle,
    pace: Option<Duration>,
}

impl<S: BarSource> Watcher<S> {
    /// Create a watcher over `keys` with the default retry policy.
    /// Duplicate keys collapse into the first occurrence.
    pub fn new(source: S, keys: Vec<SeriesKey>) -> Result<Self, WatchError> {
        Self::with_policy(source, keys, RetryPolicy::default())
    }

    pub fn with_policy(
        source: S,
        keys: Vec<SeriesKey>,
        policy: RetryPolicy,
    ) -> Result<Self, WatchError> {
        let mut deduped: Vec<SeriesKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if !deduped.contains(&key) {
                deduped.push(key);
            }
        }
        if deduped.is_empty() {
            return Err(WatchError::EmptyWatchSet);
        }

        let stop = StopHandle::new();
        Ok(Watcher {
            source: Retry::new(source, policy, stop.clone()),
            keys: deduped,
            last_seen: FxHashMap::default(),
            dispatcher: Dispatcher::new(),
            stop,
            pace: None,
        })
    }

    /// Minimum delay between full passes over the watch set. Off by
    /// default, where provider latency alone paces the loop. The delay sits
    /// between passes and never between a detection and its dispatch.
    pub fn with_pacing(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Register a subscriber. Every change event reaches every subscriber
    /// in registration order.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        self.dispatcher.register(subscriber)
    }

    /// Drop a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.dispatcher.unregister(id)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The watched keys in poll order.
    pub fn keys(&self) -> &[SeriesKey] {
        &self.keys
    }

    /// The last boundary observed for a key, once seeded.
    pub fn last_boundary(&self, key: SeriesKey) -> Option<DateTime<Utc>> {
        self.last_seen.get(&key).copied()
    }

    /// Seed a baseline for every watched series, then poll until stop is
    /// requested. Never returns early on provider trouble.
    pub async fn start(&mut self) {
        log::info!("Watching {} series on {}.", self.keys.len(), S::NAME);
        if self.seed().await.is_ok() {
            self.poll().await;
        }
        log::info!("Watcher stopped.");
    }

    /// Record the current boundary of every key so the first poll pass
    /// reports only genuinely new bars. Only an interrupt cuts this short.
    async fn seed(&mut self) -> Result<(), SourceError> {
        for i in 0..self.keys.len() {
            let key = self.keys[i];
            match self.source.fetch_latest(key).await {
                Ok(Some(bar)) => {
                    log::debug!("Seeded {} at {}.", key, bar.open_time);
                    self.last_seen.insert(key, bar.open_time);
                }
                Ok(None) => log::debug!("No baseline for {} yet.", key),
                Err(SourceError::Interrupted) => return Err(SourceError::Interrupted),
                Err(err) => log::warn!("Could not seed {}: {}", key, err),
            }
        }
        Ok(())
    }

    async fn poll(&mut self) {
        while !self.stop.is_stopped() {
            for i in 0..self.keys.len() {
                let key = self.keys[i];
                if self.stop.is_stopped() {
                    return;
                }
                match self.source.fetch_latest(key).await {
                    Ok(Some(bar)) => self.observe(key, bar.open_time).await,
                    Ok(None) => {}
                    Err(SourceError::Interrupted) => return,
                    Err(err) => log::warn!("Skipping {} this pass: {}", key, err),
                }
            }
            if let Some(pace) = self.pace {
                tokio::select! {
                    _ = self.stop.wait() => return,
                    _ = tokio::time::sleep(pace) => {}
                }
            }
        }
    }

    async fn observe(&mut self, key: SeriesKey, open_time: DateTime<Utc>) {
        match self.last_seen.get(&key) {
            Some(&last) if open_time > last => {
                log::debug!("New bar on {}: {} advanced past {}.", key, open_time, last);
                self.last_seen.insert(key, open_time);
                self.dispatcher.dispatch(key).await;
            }
            // Same bucket, or a stale row out of order. Never regress.
            Some(_) => {}
            // A series that could not be seeded takes its baseline from the
            // first successful poll without firing.
            None => {
                self.last_seen.insert(key, open_time);
            }
        }
    }
}
