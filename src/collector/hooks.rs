//! Instrumentation hooks
//!
//! Each watcher is a small state machine fed with host observations and the
//! current time. Watchers return [`Emission`]s; the tracker turns those into
//! events. A stopped watcher ignores everything it is given.
//!
//! Host-facing calls go through [`guarded`], which turns panics and errors
//! into log lines so nothing escapes into the host page.

use crate::types::EventType;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;
use tracing::{error, trace};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    #[error("invalid observation: {0}")]
    InvalidObservation(String),
}

/// Event a watcher wants recorded
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub event_type: EventType,
    pub payload: Map<String, Value>,
}

impl Emission {
    fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            payload: payload.as_object().cloned().unwrap_or_default(),
        }
    }
}

/// Run a hook body, swallowing failures
pub fn guarded<T>(hook: &str, body: impl FnOnce() -> Result<T, HookError>) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("Hook {} failed: {}", hook, e);
            None
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Hook {} panicked: {}", hook, message);
            None
        }
    }
}

/// Scroll geometry reported by the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrollObservation {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub document_height: f64,
}

impl ScrollObservation {
    /// Depth in percent, clamped to 0..=100
    pub fn percent(&self) -> Result<u8, HookError> {
        let values = [self.scroll_top, self.viewport_height, self.document_height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(HookError::InvalidObservation("non-finite scroll geometry".into()));
        }
        if self.document_height <= 0.0 {
            return Err(HookError::InvalidObservation("document height must be positive".into()));
        }
        let raw = (self.scroll_top + self.viewport_height) / self.document_height * 100.0;
        Ok(raw.clamp(0.0, 100.0).floor() as u8)
    }
}

/// Result of a scroll observation
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollUpdate {
    pub percent: u8,
    pub emission: Option<Emission>,
}

/// Emits SCROLL_DEPTH at 25% boundaries
#[derive(Debug, Default)]
pub struct ScrollWatcher {
    active: bool,
}

impl ScrollWatcher {
    pub const STEP: u8 = 25;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// `recorded_max` is the session's deepest percent so far
    pub fn observe(
        &mut self,
        observation: &ScrollObservation,
        recorded_max: u8,
    ) -> Result<Option<ScrollUpdate>, HookError> {
        if !self.active {
            return Ok(None);
        }
        let percent = observation.percent()?;
        let boundary = percent / Self::STEP * Self::STEP;
        let reached = recorded_max.min(100) / Self::STEP * Self::STEP;

        // Only the highest crossed boundary is reported on a jump
        let emission = (boundary > reached).then(|| {
            Emission::new(EventType::ScrollDepth, json!({ "depthPercent": boundary }))
        });
        Ok(Some(ScrollUpdate { percent, emission }))
    }
}

/// Accrues foreground reading time for one piece of content
#[derive(Debug)]
pub struct ReadingWatcher {
    interval: Duration,
    content_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    foreground_since: Option<DateTime<Utc>>,
    accrued: Duration,
    reported_intervals: i64,
}

impl ReadingWatcher {
    /// Create new watcher reporting every `interval` of foreground time
    pub fn new(interval: std::time::Duration) -> Self {
        Self {
            interval: Duration::from_std(interval).unwrap_or_else(|_| Duration::seconds(30)),
            content_id: None,
            started_at: None,
            foreground_since: None,
            accrued: Duration::zero(),
            reported_intervals: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    /// Start timing `content_id`; any previous reading is finished first
    pub fn begin(&mut self, content_id: impl Into<String>, now: DateTime<Utc>, foreground: bool) -> Vec<Emission> {
        let finished = self.finish(now);
        self.content_id = Some(content_id.into());
        self.started_at = Some(now);
        self.foreground_since = foreground.then_some(now);
        self.accrued = Duration::zero();
        self.reported_intervals = 0;
        finished
    }

    /// Host visibility change
    pub fn set_foreground(&mut self, foreground: bool, now: DateTime<Utc>) {
        if !self.is_active() {
            return;
        }
        match (foreground, self.foreground_since) {
            (true, None) => self.foreground_since = Some(now),
            (false, Some(since)) => {
                self.accrued = self.accrued + (now - since).max(Duration::zero());
                self.foreground_since = None;
            }
            _ => {}
        }
    }

    fn foreground_time(&self, now: DateTime<Utc>) -> Duration {
        let running = self
            .foreground_since
            .map(|since| (now - since).max(Duration::zero()))
            .unwrap_or_else(Duration::zero);
        self.accrued + running
    }

    /// Emit READING_TIME for every full interval not yet reported
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Emission> {
        if !self.is_active() || self.interval <= Duration::zero() {
            return Vec::new();
        }
        let total = self.foreground_time(now);
        let due = total.num_milliseconds() / self.interval.num_milliseconds().max(1);
        let interval_secs = self.interval.num_seconds();

        let mut emissions = Vec::new();
        while self.reported_intervals < due {
            self.reported_intervals += 1;
            emissions.push(Emission::new(
                EventType::ReadingTime,
                json!({
                    "contentId": self.content_id,
                    "foregroundSeconds": self.reported_intervals * interval_secs,
                }),
            ));
        }
        emissions
    }

    /// Stop timing and emit READING_END
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<Emission> {
        let Some(started_at) = self.started_at else {
            return Vec::new();
        };
        let mut emissions = self.tick(now);
        let foreground = self.foreground_time(now);
        emissions.push(Emission::new(
            EventType::ReadingEnd,
            json!({
                "contentId": self.content_id,
                "foregroundSeconds": foreground.num_seconds(),
                "elapsedSeconds": (now - started_at).max(Duration::zero()).num_seconds(),
            }),
        ));
        self.started_at = None;
        self.foreground_since = None;
        self.content_id = None;
        emissions
    }
}

/// Navigation timing for one page load, in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadTiming {
    pub dns: f64,
    pub connect: f64,
    pub ttfb: f64,
    pub dom_content_loaded: f64,
    pub load: f64,
}

/// A large-paint style metric observed by the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaintMetric {
    pub name: String,
    pub value_ms: f64,
    #[serde(default)]
    pub element: Option<String>,
}

/// One PERFORMANCE_TIMING per load plus a LARGEST_PAINT per metric
#[derive(Debug, Default)]
pub struct PerformanceWatcher {
    active: bool,
    load_reported: bool,
}

impl PerformanceWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for a new page load
    pub fn start(&mut self) {
        self.active = true;
        self.load_reported = false;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn load_complete(&mut self, timing: &LoadTiming) -> Result<Option<Emission>, HookError> {
        if !self.active || self.load_reported {
            return Ok(None);
        }
        let values = [timing.dns, timing.connect, timing.ttfb, timing.dom_content_loaded, timing.load];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(HookError::InvalidObservation("negative or non-finite timing".into()));
        }
        self.load_reported = true;
        Ok(Some(Emission::new(
            EventType::PerformanceTiming,
            json!({
                "dns": timing.dns,
                "connect": timing.connect,
                "ttfb": timing.ttfb,
                "domContentLoaded": timing.dom_content_loaded,
                "load": timing.load,
            }),
        )))
    }

    pub fn paint(&mut self, metric: &PaintMetric) -> Result<Option<Emission>, HookError> {
        if !self.active {
            return Ok(None);
        }
        if !metric.value_ms.is_finite() || metric.value_ms < 0.0 {
            return Err(HookError::InvalidObservation(format!(
                "paint metric {} has value {}",
                metric.name, metric.value_ms
            )));
        }
        Ok(Some(Emission::new(
            EventType::LargestPaint,
            json!({
                "metric": metric.name,
                "valueMs": metric.value_ms,
                "element": metric.element,
            }),
        )))
    }
}

/// An uncaught error surfaced by the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

/// Deduplicating, rate-capped ERROR_OCCURRED emitter
pub struct ErrorWatcher {
    active: bool,
    dedupe_window: Duration,
    max_per_minute: u32,
    recent: LruCache<String, DateTime<Utc>>,
    minute_started: Option<DateTime<Utc>>,
    emitted_this_minute: u32,
}

impl ErrorWatcher {
    /// Create new watcher
    pub fn new(dedupe_window: std::time::Duration, max_per_minute: u32) -> Self {
        Self {
            active: false,
            dedupe_window: Duration::from_std(dedupe_window).unwrap_or_else(|_| Duration::seconds(10)),
            max_per_minute,
            recent: LruCache::new(NonZeroUsize::new(128).unwrap_or(NonZeroUsize::MIN)),
            minute_started: None,
            emitted_this_minute: 0,
        }
    }

    pub fn start(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn report(&mut self, report: &ErrorReport, now: DateTime<Utc>) -> Option<Emission> {
        if !self.active {
            return None;
        }

        let key = format!("{}\n{}", report.message, report.stack.as_deref().unwrap_or(""));
        if let Some(seen) = self.recent.get(&key) {
            if now - *seen < self.dedupe_window {
                trace!("Suppressing duplicate error: {}", report.message);
                return None;
            }
        }

        match self.minute_started {
            Some(start) if now - start < Duration::minutes(1) => {}
            _ => {
                self.minute_started = Some(now);
                self.emitted_this_minute = 0;
            }
        }
        if self.emitted_this_minute >= self.max_per_minute {
            trace!("Error rate cap reached, dropping: {}", report.message);
            return None;
        }

        self.recent.put(key, now);
        self.emitted_this_minute += 1;
        Some(Emission::new(
            EventType::ErrorOccurred,
            json!({
                "message": report.message,
                "stack": report.stack,
                "source": report.source,
                "line": report.line,
            }),
        ))
    }
}

/// Teardown sequencing
#[derive(Debug, Default)]
pub struct UnloadWatcher {
    entered_at: Option<DateTime<Utc>>,
}

/// What teardown produced, in emission order
#[derive(Debug, Clone, PartialEq)]
pub struct Teardown {
    pub emissions: Vec<Emission>,
    /// The buffer must go out through the beacon after these are enqueued
    pub beacon: bool,
}

impl UnloadWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page was entered
    pub fn enter(&mut self, now: DateTime<Utc>) {
        self.entered_at = Some(now);
    }

    /// PAGE_EXIT, then the reading watcher's final events
    pub fn teardown(&mut self, now: DateTime<Utc>, reading: &mut ReadingWatcher) -> Teardown {
        let mut emissions = Vec::new();
        if let Some(entered) = self.entered_at.take() {
            emissions.push(Emission::new(
                EventType::PageExit,
                json!({ "timeOnPageSeconds": (now - entered).max(Duration::zero()).num_seconds() }),
            ));
        }
        emissions.extend(reading.finish(now));
        Teardown {
            emissions,
            beacon: true,
        }
    }
}
