//! Page vitals sampling.
//!
//! The host (a webview bridge, a headless browser driver, a test) feeds
//! performance entries into a [`PerformanceSource`]; [`VitalsSampler`]
//! turns them into one [`PerformanceMetrics`] tuple per page.
//!
//! Every asynchronous measurement is bounded: it resolves with
//! [`Observation::TimedOut`] when the signal never shows up and always
//! releases its observation channel, whichever way it finishes.

use crate::logger::Logger;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep, timeout};

/// Performance observation channels, mirroring the browser entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Paint,
    LargestContentfulPaint,
    LayoutShift,
    FirstInput,
}

/// One entry delivered on an observation channel. Times are milliseconds
/// since navigation start.
#[derive(Debug, Clone, PartialEq)]
pub enum PerformanceEntry {
    Paint { name: String, start_time: f64 },
    LargestContentfulPaint { start_time: f64 },
    LayoutShift { value: f64, had_recent_input: bool },
    FirstInput { start_time: f64, processing_start: f64 },
}

/// Navigation timing marks, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub load_event_end: f64,
}

/// Host-provided access to performance signals.
pub trait PerformanceSource: Send + Sync {
    fn navigation_timing(&self) -> NavigationTiming;

    /// Start observing `kind`. Each message is one batch of entries, like a
    /// single observer callback. Dropping the receiver disconnects the
    /// observer.
    ///
    /// Returns `None` when the channel isn't supported.
    fn observe(&self, kind: EntryKind) -> Option<UnboundedReceiver<Vec<PerformanceEntry>>>;
}

/// Estimates time-to-interactive, in milliseconds.
#[async_trait]
pub trait TtiEstimator: Send + Sync {
    /// `None` when no estimate can be produced.
    async fn first_consistently_interactive(&self) -> Option<f64>;
}

/// Estimator used when the host provides none.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTtiEstimator;

#[async_trait]
impl TtiEstimator for NoTtiEstimator {
    async fn first_consistently_interactive(&self) -> Option<f64> {
        None
    }
}

/// Outcome of one bounded measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Observation<T> {
    Observed(T),
    /// The channel is unsupported or closed before a qualifying entry.
    NotObserved,
    TimedOut,
}

impl<T: Copy> Observation<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Observation::Observed(v) => Some(*v),
            _ => None,
        }
    }
}

/// Complete vitals tuple for one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub page_load_time: f64,
    pub first_contentful_paint: Observation<f64>,
    pub largest_contentful_paint: Observation<f64>,
    pub cumulative_layout_shift: Observation<f64>,
    pub first_input_delay: Observation<f64>,
    pub time_to_interactive: Observation<f64>,
}

/// Payload of the `/api/performance` report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetricsReport {
    pub page: String,
    pub metrics: PerformanceMetrics,
    pub timestamp: chrono::DateTime<Utc>,
    pub user_agent: String,
}

/// Receives the raw metrics of every completed collection.
#[async_trait]
pub trait MetricsReporter: Send + Sync {
    async fn report(&self, report: &PageMetricsReport) -> Result<(), crate::sink::SinkError>;
}

#[derive(Clone, Debug)]
pub struct VitalsConfig {
    /// Upper bound for FCP, LCP, FID and TTI.
    pub observe_timeout: Duration,
    /// Accumulation window for CLS.
    pub cls_window: Duration,
    /// User agent sent with metric reports.
    pub user_agent: String,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            observe_timeout: Duration::from_secs(10),
            cls_window: Duration::from_secs(5),
            user_agent: crate::logger::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VitalsError {
    #[error("vitals sampler has not been installed")]
    NotInstalled,
}

static INSTANCE: RwLock<Option<Arc<VitalsSampler>>> = RwLock::new(None);

/// Samples page vitals and keeps the latest tuple per page key.
pub struct VitalsSampler {
    source: Arc<dyn PerformanceSource>,
    tti: Arc<dyn TtiEstimator>,
    reporter: Option<Arc<dyn MetricsReporter>>,
    logger: Option<Logger>,
    config: VitalsConfig,
    metrics: Mutex<HashMap<String, PerformanceMetrics>>,
}

impl VitalsSampler {
    pub fn new(source: Arc<dyn PerformanceSource>) -> Self {
        Self {
            source,
            tti: Arc::new(NoTtiEstimator),
            reporter: None,
            logger: None,
            config: VitalsConfig::default(),
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tti(mut self, tti: Arc<dyn TtiEstimator>) -> Self {
        self.tti = tti;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn MetricsReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Also report each observed value through [`Logger::performance`].
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_config(mut self, config: VitalsConfig) -> Self {
        self.config = config;
        self
    }

    /// Make `sampler` the process-wide instance.
    ///
    /// If an instance is already installed it is returned unchanged and
    /// `sampler` is dropped, so every caller ends up sharing one sampler.
    pub fn install(sampler: VitalsSampler) -> Arc<VitalsSampler> {
        let mut slot = INSTANCE.write().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(existing) => Arc::clone(existing),
            None => {
                let sampler = Arc::new(sampler);
                *slot = Some(Arc::clone(&sampler));
                sampler
            }
        }
    }

    /// The process-wide instance installed with [`install`](Self::install).
    pub fn get_instance() -> Result<Arc<VitalsSampler>, VitalsError> {
        INSTANCE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(VitalsError::NotInstalled)
    }

    /// Remove the process-wide instance, returning it. Handles already
    /// obtained keep working.
    pub fn teardown() -> Option<Arc<VitalsSampler>> {
        INSTANCE.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn metrics(&self) -> MutexGuard<'_, HashMap<String, PerformanceMetrics>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `load_event_end - navigation_start`, in milliseconds.
    pub fn measure_page_load(&self) -> f64 {
        let timing = self.source.navigation_timing();
        timing.load_event_end - timing.navigation_start
    }

    /// Start time of the `first-contentful-paint` paint entry.
    pub async fn measure_fcp(&self) -> Observation<f64> {
        self.first_match(EntryKind::Paint, |batch| {
            batch.iter().find_map(|entry| match entry {
                PerformanceEntry::Paint { name, start_time } if name == "first-contentful-paint" => {
                    Some(*start_time)
                }
                _ => None,
            })
        })
        .await
    }

    /// Start time of the last entry in the first non-empty LCP batch.
    pub async fn measure_lcp(&self) -> Observation<f64> {
        self.first_match(EntryKind::LargestContentfulPaint, |batch| {
            batch.iter().rev().find_map(|entry| match entry {
                PerformanceEntry::LargestContentfulPaint { start_time } => Some(*start_time),
                _ => None,
            })
        })
        .await
    }

    /// Delay between the first input and the start of its processing.
    pub async fn measure_fid(&self) -> Observation<f64> {
        self.first_match(EntryKind::FirstInput, |batch| {
            batch.iter().find_map(|entry| match entry {
                PerformanceEntry::FirstInput { start_time, processing_start } => {
                    Some(processing_start - start_time)
                }
                _ => None,
            })
        })
        .await
    }

    /// Sum of layout shifts without recent input over `cls_window`.
    pub async fn measure_cls(&self) -> Observation<f64> {
        let Some(mut rx) = self.source.observe(EntryKind::LayoutShift) else {
            return Observation::NotObserved;
        };

        let mut total = 0.0;
        let window = sleep(self.config.cls_window);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                batch = rx.recv() => match batch {
                    Some(batch) => {
                        for entry in batch {
                            if let PerformanceEntry::LayoutShift { value, had_recent_input: false } = entry {
                                total += value;
                            }
                        }
                    }
                    // Source went away; what was seen so far is the score.
                    None => break,
                },
            }
        }
        Observation::Observed(total)
    }

    pub async fn measure_tti(&self) -> Observation<f64> {
        match timeout(self.config.observe_timeout, self.tti.first_consistently_interactive()).await {
            Ok(Some(tti)) => Observation::Observed(tti),
            Ok(None) => Observation::NotObserved,
            Err(_) => Observation::TimedOut,
        }
    }

    async fn first_match<F>(&self, kind: EntryKind, mut pick: F) -> Observation<f64>
    where
        F: FnMut(&[PerformanceEntry]) -> Option<f64>,
    {
        let Some(mut rx) = self.source.observe(kind) else {
            return Observation::NotObserved;
        };

        let wait = async move {
            while let Some(batch) = rx.recv().await {
                if let Some(value) = pick(&batch) {
                    return Observation::Observed(value);
                }
            }
            Observation::NotObserved
        };

        // `rx` lives in `wait`, so it's dropped (disconnecting the observer)
        // on every path out of here.
        timeout(self.config.observe_timeout, wait)
            .await
            .unwrap_or(Observation::TimedOut)
    }

    /// Measure everything for `page`, store the tuple (replacing any previous
    /// one), log a summary and report it in the background.
    pub async fn collect_metrics(&self, page: &str) -> PerformanceMetrics {
        let (fcp, lcp, cls, fid, tti) = tokio::join!(
            self.measure_fcp(),
            self.measure_lcp(),
            self.measure_cls(),
            self.measure_fid(),
            self.measure_tti(),
        );

        let metrics = PerformanceMetrics {
            page_load_time: self.measure_page_load(),
            first_contentful_paint: fcp,
            largest_contentful_paint: lcp,
            cumulative_layout_shift: cls,
            first_input_delay: fid,
            time_to_interactive: tti,
        };

        self.metrics().insert(page.to_string(), metrics);
        self.log_metrics(page, &metrics);
        self.spawn_report(page, metrics);
        metrics
    }

    fn log_metrics(&self, page: &str, metrics: &PerformanceMetrics) {
        tracing::info!(
            page,
            page_load_ms = metrics.page_load_time,
            fcp = ?metrics.first_contentful_paint,
            lcp = ?metrics.largest_contentful_paint,
            cls = ?metrics.cumulative_layout_shift,
            fid = ?metrics.first_input_delay,
            tti = ?metrics.time_to_interactive,
            "performance metrics collected"
        );

        let Some(logger) = &self.logger else {
            return;
        };
        logger.performance("page_load_time", metrics.page_load_time, "ms");
        let observed = [
            ("first_contentful_paint", metrics.first_contentful_paint, "ms"),
            ("largest_contentful_paint", metrics.largest_contentful_paint, "ms"),
            ("cumulative_layout_shift", metrics.cumulative_layout_shift, "score"),
            ("first_input_delay", metrics.first_input_delay, "ms"),
            ("time_to_interactive", metrics.time_to_interactive, "ms"),
        ];
        for (metric, observation, unit) in observed {
            if let Some(value) = observation.value() {
                logger.performance(metric, value, unit);
            }
        }
    }

    fn spawn_report(&self, page: &str, metrics: PerformanceMetrics) {
        let Some(reporter) = self.reporter.clone() else {
            return;
        };
        let report = PageMetricsReport {
            page: page.to_string(),
            metrics,
            timestamp: Utc::now(),
            user_agent: self.config.user_agent.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = reporter.report(&report).await {
                tracing::warn!(page = %report.page, error = %e, "failed to send performance metrics");
            }
        });
    }

    pub fn get_metrics(&self, page: &str) -> Option<PerformanceMetrics> {
        self.metrics().get(page).copied()
    }

    /// Copy of every stored tuple.
    pub fn get_all_metrics(&self) -> HashMap<String, PerformanceMetrics> {
        self.metrics().clone()
    }

    pub fn clear_metrics(&self) {
        self.metrics().clear();
    }
}

/// In-process [`PerformanceSource`] that hosts push entries into.
///
/// Entries emitted while nobody observes a kind are dropped, as with a
/// non-buffered browser observer.
#[derive(Default)]
pub struct ChannelSource {
    timing: RwLock<NavigationTiming>,
    observers: Mutex<HashMap<EntryKind, Vec<UnboundedSender<Vec<PerformanceEntry>>>>>,
    unsupported: RwLock<Vec<EntryKind>>,
}

impl ChannelSource {
    pub fn new(timing: NavigationTiming) -> Self {
        Self { timing: RwLock::new(timing), ..Self::default() }
    }

    pub fn set_navigation_timing(&self, timing: NavigationTiming) {
        *self.timing.write().unwrap_or_else(PoisonError::into_inner) = timing;
    }

    /// Mark `kind` as unsupported; later `observe` calls return `None`.
    pub fn mark_unsupported(&self, kind: EntryKind) {
        self.unsupported
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
    }

    /// Deliver one batch to every live observer of `kind`. Returns how many
    /// observers received it.
    pub fn emit(&self, kind: EntryKind, entries: Vec<PerformanceEntry>) -> usize {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(senders) = observers.get_mut(&kind) else {
            return 0;
        };
        senders.retain(|tx| tx.send(entries.clone()).is_ok());
        senders.len()
    }

    /// Number of connected observers of `kind`.
    pub fn observer_count(&self, kind: EntryKind) -> usize {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        match observers.get_mut(&kind) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders.len()
            }
            None => 0,
        }
    }
}

impl PerformanceSource for ChannelSource {
    fn navigation_timing(&self) -> NavigationTiming {
        *self.timing.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn observe(&self, kind: EntryKind) -> Option<UnboundedReceiver<Vec<PerformanceEntry>>> {
        if self
            .unsupported
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind)
        {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(tx);
        Some(rx)
    }
}

#[cfg(feature = "http")]
pub use self::http_reporter::HttpMetricsReporter;

#[cfg(feature = "http")]
mod http_reporter {
    use super::{MetricsReporter, PageMetricsReport};
    use crate::sink::SinkError;
    use async_trait::async_trait;
    use reqwest::Client;

    /// Posts reports as JSON, by default to `/api/performance`.
    #[derive(Clone)]
    pub struct HttpMetricsReporter {
        client: Client,
        endpoint: String,
    }

    impl HttpMetricsReporter {
        pub fn new(endpoint: impl Into<String>) -> Self {
            Self { client: Client::new(), endpoint: endpoint.into() }
        }

        /// Reporter for `{base_url}/api/performance`.
        pub fn for_base_url(base_url: &str) -> Self {
            Self::new(format!(
                "{}{}",
                base_url.trim_end_matches('/'),
                crate::env::DEFAULT_PERFORMANCE_PATH
            ))
        }
    }

    #[async_trait]
    impl MetricsReporter for HttpMetricsReporter {
        async fn report(&self, report: &PageMetricsReport) -> Result<(), SinkError> {
            let resp = self.client.post(&self.endpoint).json(report).send().await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
                Err(SinkError::Status { status, body })
            }
        }
    }
}
