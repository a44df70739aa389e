//! Tracker facade
//!
//! The only surface the host talks to. It gates on consent, rate-limits
//! noisy event types, strips sensitive payload keys, stamps non-decreasing
//! timestamps and routes watcher emissions into the [`EventQueue`]. No call
//! returns an error to the host.

use super::hooks::{
    guarded, Emission, ErrorReport, ErrorWatcher, LoadTiming, PaintMetric, PerformanceWatcher,
    ReadingWatcher, ScrollObservation, ScrollWatcher, UnloadWatcher,
};
use super::profiler::{profile, RawEnvironment};
use super::queue::{EventQueue, FlushOutcome, FlushTrigger};
use super::session::{SessionRegister, SessionStore};
use crate::clock::SharedClock;
use crate::config::PulseConfig;
use crate::types::{DeviceInfo, Event, EventType};
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use serde_json::{json, Map, Value};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Payload keys removed before anything is queued
pub const SENSITIVE_KEYS: &[&str] = &["password", "token", "email", "phone"];

/// Longest search query kept
pub const MAX_QUERY_CHARS: usize = 100;

const TRUNCATION_MARKER: &str = "_truncated";

/// Remove sensitive keys and cap the serialized size of a payload
///
/// An oversized payload keeps entries in order while they fit and gains
/// `"_truncated": true`.
pub fn sanitize(payload: Map<String, Value>, max_bytes: usize) -> Map<String, Value> {
    let cleaned: Map<String, Value> = payload
        .into_iter()
        .filter(|(key, _)| !SENSITIVE_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)))
        .collect();

    if serialized_len(&cleaned) <= max_bytes {
        return cleaned;
    }

    // Room for the marker entry itself
    let marker_len = TRUNCATION_MARKER.len() + 8;
    let mut kept = Map::new();
    for (key, value) in cleaned {
        kept.insert(key.clone(), value);
        if serialized_len(&kept) + marker_len > max_bytes {
            kept.remove(&key);
            break;
        }
    }
    kept.insert(TRUNCATION_MARKER.to_string(), Value::Bool(true));
    kept
}

fn serialized_len(map: &Map<String, Value>) -> usize {
    serde_json::to_vec(map).map(|v| v.len()).unwrap_or(usize::MAX)
}

/// Per-event-type windowed counter
pub struct RateLimiter {
    per_minute: u32,
    windows: LruCache<EventType, (DateTime<Utc>, u32)>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            per_minute,
            windows: LruCache::new(NonZeroUsize::new(32).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Count one event; false once the type exhausted its minute
    pub fn allow(&mut self, event_type: EventType, now: DateTime<Utc>) -> bool {
        if event_type.is_critical() {
            return true;
        }
        let window = self.windows.get_or_insert_mut(event_type, || (now, 0));
        if now - window.0 >= Duration::minutes(1) {
            *window = (now, 0);
        }
        if window.1 >= self.per_minute {
            return false;
        }
        window.1 += 1;
        true
    }
}

/// Kinds of explicit content interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Like,
    Share,
    Comment,
    Bookmark,
}

impl Interaction {
    fn event_type(self) -> EventType {
        match self {
            Interaction::Like => EventType::Like,
            Interaction::Share => EventType::Share,
            Interaction::Comment => EventType::Comment,
            Interaction::Bookmark => EventType::Bookmark,
        }
    }
}

/// Client-side telemetry facade
pub struct Tracker {
    queue: Arc<EventQueue>,
    clock: SharedClock,
    sessions: SessionRegister,
    device: DeviceInfo,
    limiter: RateLimiter,
    respect_dnt: bool,
    consent_withheld: bool,
    max_payload_bytes: usize,
    last_timestamp: Option<DateTime<Utc>>,
    subject_id: Option<String>,
    page_url: String,
    referrer: Option<String>,
    content_id: Option<String>,
    foreground: bool,
    scroll: ScrollWatcher,
    reading: ReadingWatcher,
    performance: PerformanceWatcher,
    errors: ErrorWatcher,
    unload: UnloadWatcher,
}

impl Tracker {
    /// Create new tracker for one browsing context
    pub fn new(
        config: &PulseConfig,
        queue: Arc<EventQueue>,
        clock: SharedClock,
        session_store: Box<dyn SessionStore>,
        environment: &RawEnvironment,
    ) -> Self {
        let mut errors = ErrorWatcher::new(
            config.hooks.error_dedupe_window,
            config.hooks.max_errors_per_minute,
        );
        errors.start();

        Self {
            queue,
            clock,
            sessions: SessionRegister::new(session_store, config.session.ttl),
            device: profile(environment),
            limiter: RateLimiter::new(config.collector.rate_limit_per_minute),
            respect_dnt: config.collector.respect_dnt,
            consent_withheld: false,
            max_payload_bytes: config.collector.max_payload_bytes,
            last_timestamp: None,
            subject_id: None,
            page_url: String::new(),
            referrer: None,
            content_id: None,
            foreground: true,
            scroll: ScrollWatcher::new(),
            reading: ReadingWatcher::new(config.hooks.reading_interval),
            performance: PerformanceWatcher::new(),
            errors,
            unload: UnloadWatcher::new(),
        }
    }

    /// Do-Not-Track or an explicit opt-out
    pub fn set_consent(&mut self, granted: bool) {
        self.consent_withheld = !granted;
        if !granted {
            debug!("Consent withheld, tracking paused");
        }
    }

    pub fn set_subject(&mut self, subject_id: Option<String>) {
        self.subject_id = subject_id;
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    /// Deepest scroll percent recorded in the current session
    pub fn max_scroll_depth(&self) -> u8 {
        self.sessions.max_scroll_depth()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.sessions.current().map(|s| s.id.as_str())
    }

    fn gated(&self) -> bool {
        self.respect_dnt && self.consent_withheld
    }

    fn stamp(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        let stamped = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(stamped);
        stamped
    }

    fn build(&self, event_type: EventType, session_id: &str, timestamp: DateTime<Utc>, payload: Map<String, Value>) -> Event {
        let mut event = Event::new(event_type, session_id, self.page_url.clone(), timestamp)
            .with_subject(self.subject_id.clone())
            .with_payload(payload);
        event.content_id = self.content_id.clone();
        event.referrer = self.referrer.clone();
        event.device_info = self.device.clone();
        event
    }

    /// Record one event; returns the trigger the queue reported
    pub fn record(&mut self, event_type: EventType, payload: Map<String, Value>) -> FlushTrigger {
        if self.gated() {
            trace!("Dropping {} under withheld consent", event_type);
            return FlushTrigger::None;
        }
        let timestamp = self.stamp();
        if !self.limiter.allow(event_type, timestamp) {
            trace!("Rate limit reached for {}", event_type);
            return FlushTrigger::None;
        }

        let touch = self.sessions.touch(timestamp, &self.device);
        if let Some(expired) = touch.expired {
            let ended = self.build(
                EventType::SessionEnd,
                &expired.id,
                timestamp,
                json_map(json!({ "reason": "timeout", "maxScrollDepthPercent": expired.max_scroll_depth_percent })),
            );
            self.queue.enqueue(ended);
        }
        if touch.started && event_type != EventType::SessionStart {
            let started = self.build(EventType::SessionStart, &touch.session_id, timestamp, Map::new());
            self.queue.enqueue(started);
        }

        let payload = sanitize(payload, self.max_payload_bytes);
        let event = self.build(event_type, &touch.session_id, timestamp, payload);
        self.queue.enqueue(event)
    }

    fn emit(&mut self, emissions: Vec<Emission>) {
        for emission in emissions {
            self.record(emission.event_type, emission.payload);
        }
    }

    /// Navigation to a new page, optionally showing a piece of content
    pub fn page_view(&mut self, page_url: impl Into<String>, content_id: Option<String>, referrer: Option<String>) {
        let now = self.clock.now();
        // Close out the previous page's reading before switching context
        let finished = self.reading.finish(now);
        self.emit(finished);

        self.page_url = page_url.into();
        self.referrer = referrer;
        self.content_id = content_id.clone();
        // The scroll maximum spans the session, not the page
        self.scroll.start();
        self.performance.start();
        self.unload.enter(now);

        self.record(EventType::PageView, Map::new());
        if let Some(content_id) = content_id {
            let _ = self.reading.begin(content_id, now, self.foreground);
        }
    }

    pub fn click(&mut self, target: &str, href: Option<&str>) {
        self.record(EventType::Click, json_map(json!({ "target": target, "href": href })));
    }

    pub fn search(&mut self, query: &str, result_count: Option<u32>) {
        let query: String = query.chars().take(MAX_QUERY_CHARS).collect();
        self.record(
            EventType::Search,
            json_map(json!({ "query": query, "resultCount": result_count })),
        );
    }

    pub fn reading_progress(&mut self, percent: u8) {
        self.record(
            EventType::ReadingProgress,
            json_map(json!({ "percent": percent.min(100) })),
        );
    }

    /// Like, share, comment or bookmark; `content_id` defaults to the current page
    pub fn interact(&mut self, kind: Interaction, content_id: Option<&str>, detail: Map<String, Value>) {
        let previous = self.content_id.clone();
        if let Some(id) = content_id {
            self.content_id = Some(id.to_string());
        }
        self.record(kind.event_type(), detail);
        self.content_id = previous;
    }

    pub fn observe_scroll(&mut self, observation: &ScrollObservation) {
        let recorded = self.sessions.max_scroll_depth();
        let scroll = &mut self.scroll;
        let Some(Some(update)) = guarded("scroll", || scroll.observe(observation, recorded)) else {
            return;
        };
        self.sessions.record_scroll(update.percent);
        if let Some(emission) = update.emission {
            self.emit(vec![emission]);
        }
    }

    /// Host visibility changed
    pub fn set_foreground(&mut self, foreground: bool) {
        let now = self.clock.now();
        self.foreground = foreground;
        let reading = &mut self.reading;
        guarded("reading", || {
            reading.set_foreground(foreground, now);
            Ok(())
        });
    }

    /// Scheduler tick for time-based watchers
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let reading = &mut self.reading;
        if let Some(emissions) = guarded("reading", || Ok(reading.tick(now))) {
            self.emit(emissions);
        }
    }

    pub fn load_complete(&mut self, timing: &LoadTiming) {
        let performance = &mut self.performance;
        if let Some(Some(emission)) = guarded("performance", || performance.load_complete(timing)) {
            self.emit(vec![emission]);
        }
    }

    pub fn paint(&mut self, metric: &PaintMetric) {
        let performance = &mut self.performance;
        if let Some(Some(emission)) = guarded("performance", || performance.paint(metric)) {
            self.emit(vec![emission]);
        }
    }

    pub fn report_error(&mut self, report: &ErrorReport) {
        let now = self.clock.now();
        let errors = &mut self.errors;
        if let Some(Some(emission)) = guarded("errors", || Ok(errors.report(report, now))) {
            self.emit(vec![emission]);
        }
    }

    /// Explicit end of the session
    pub fn end_session(&mut self) {
        if self.sessions.current().is_none() {
            return;
        }
        self.record(EventType::SessionEnd, json_map(json!({ "reason": "exit" })));
        self.sessions.end();
    }

    /// Host teardown: PAGE_EXIT, final reading events, then the beacon
    pub fn teardown(&mut self) -> FlushOutcome {
        let now = self.clock.now();
        let (unload, reading) = (&mut self.unload, &mut self.reading);
        let teardown = guarded("unload", || Ok(unload.teardown(now, reading)));
        self.scroll.stop();
        self.performance.stop();

        match teardown {
            Some(teardown) => {
                self.emit(teardown.emissions);
                if teardown.beacon {
                    self.queue.beacon()
                } else {
                    FlushOutcome::Empty
                }
            }
            None => self.queue.beacon(),
        }
    }
}

fn json_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
