//! Collection pipeline: queue batching, ordering, retries and the tracker facade

mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::{collector_config, manual_clock, page_view, FailingTransport, GatedTransport, RecordingTransport};
use readerpulse_core::collector::{
    Dispatcher, ErrorReport, EventQueue, FlushOutcome, FlushTrigger, Interaction, JsonFileSessionStore,
    MemorySessionStore, RawEnvironment, ScrollObservation, Tracker, Transport,
};
use readerpulse_core::{Clock, DeliveryError, Event, EventType, ManualClock, PulseConfig};
use serde_json::Map;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn content_ids(batch: &[Event]) -> Vec<String> {
    batch
        .iter()
        .map(|e| e.content_id.clone().unwrap_or_default())
        .collect()
}

fn types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn test_partial_batch_waits_for_interval() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(RecordingTransport::new());
    let queue = EventQueue::new(&collector_config(10, 5000, 3), transport.clone(), shared);

    for n in 0..3 {
        assert_eq!(queue.enqueue(page_view(n, clock.now())), FlushTrigger::None);
    }
    assert_eq!(queue.tick().await, FlushOutcome::NotDue);
    clock.advance(Duration::milliseconds(4999));
    assert_eq!(queue.tick().await, FlushOutcome::NotDue);
    assert!(transport.attempts().is_empty());

    clock.advance(Duration::milliseconds(1));
    assert_eq!(queue.tick().await, FlushOutcome::Delivered(3));
    assert_eq!(content_ids(&transport.attempts()[0]), vec!["c0", "c1", "c2"]);
}

#[tokio::test]
async fn test_full_batch_triggers_flush() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(RecordingTransport::new());
    let queue = EventQueue::new(&collector_config(10, 5000, 3), transport.clone(), shared);

    for n in 0..9 {
        assert_eq!(queue.enqueue(page_view(n, clock.now())), FlushTrigger::None);
    }
    assert_eq!(queue.enqueue(page_view(9, clock.now())), FlushTrigger::BatchFull);
    assert_eq!(queue.flush(false).await, FlushOutcome::Delivered(10));
    assert_eq!(queue.stats().delivered, 10);
}

#[tokio::test]
async fn test_critical_event_flushes_alone() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(RecordingTransport::new());
    let queue = EventQueue::new(&collector_config(10, 5000, 3), transport.clone(), shared);

    let error = Event::new(EventType::ErrorOccurred, "s-1", "/a", clock.now());
    assert_eq!(queue.enqueue(error), FlushTrigger::Critical);
    assert_eq!(queue.flush(false).await, FlushOutcome::Delivered(1));
    assert_eq!(types(&transport.attempts()[0]), vec![EventType::ErrorOccurred]);
}

#[tokio::test]
async fn test_failed_batch_keeps_order_ahead_of_new_events() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(RecordingTransport::scripted(vec![Err(
        DeliveryError::Transport("connection reset".to_string()),
    )]));
    let queue = EventQueue::new(&collector_config(10, 5000, 3), transport.clone(), shared);

    for n in 0..3 {
        queue.enqueue(page_view(n, clock.now()));
    }
    assert_eq!(
        queue.flush(false).await,
        FlushOutcome::Failed { requeued: 3, dropped: 0 }
    );
    for n in 3..5 {
        queue.enqueue(page_view(n, clock.now()));
    }

    // A pending retry is due on the next tick regardless of the interval
    assert_eq!(queue.tick().await, FlushOutcome::Delivered(5));
    let attempts = transport.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(content_ids(&attempts[1]), vec!["c0", "c1", "c2", "c3", "c4"]);
    assert_eq!(queue.stats().retried_batches, 1);
    assert_eq!(queue.stats().lost, 0);
}

#[tokio::test]
async fn test_retry_cap_drops_and_counts_loss() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(FailingTransport {
        error: DeliveryError::Status(503),
    });
    let queue = EventQueue::new(&collector_config(10, 5000, 3), transport, shared);

    queue.enqueue(page_view(0, clock.now()));
    queue.enqueue(page_view(1, clock.now()));
    assert_eq!(queue.flush(false).await, FlushOutcome::Failed { requeued: 2, dropped: 0 });
    assert_eq!(queue.flush(false).await, FlushOutcome::Failed { requeued: 2, dropped: 0 });
    assert_eq!(queue.flush(false).await, FlushOutcome::Failed { requeued: 0, dropped: 2 });

    let stats = queue.stats();
    assert_eq!(stats.lost, 2);
    assert_eq!(stats.buffered, 0);
    assert_eq!(queue.flush(false).await, FlushOutcome::Empty);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(FailingTransport {
        error: DeliveryError::Status(400),
    });
    let queue = EventQueue::new(&collector_config(10, 5000, 3), transport, shared);

    queue.enqueue(page_view(0, clock.now()));
    assert_eq!(queue.flush(false).await, FlushOutcome::Failed { requeued: 0, dropped: 1 });
    assert_eq!(queue.stats().lost, 1);
}

struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _batch: &[Event]) -> Result<(), DeliveryError> {
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        Ok(())
    }

    fn beacon(&self, _batch: Vec<Event>) {}
}

#[tokio::test]
async fn test_request_timeout_requeues() {
    let (clock, shared) = manual_clock();
    let queue = EventQueue::new(&collector_config(10, 5000, 3), Arc::new(StalledTransport), shared);

    queue.enqueue(page_view(0, clock.now()));
    assert_eq!(queue.flush(false).await, FlushOutcome::Failed { requeued: 1, dropped: 0 });
    assert_eq!(queue.pending().len(), 1);
}

#[tokio::test]
async fn test_second_flush_skips_while_in_flight() {
    let (clock, shared) = manual_clock();
    let transport = Arc::new(GatedTransport::new());
    let queue = Arc::new(EventQueue::new(&collector_config(10, 5000, 3), transport.clone(), shared));

    queue.enqueue(page_view(0, clock.now()));
    let first = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.flush(false).await })
    };
    while !transport.is_entered() {
        tokio::task::yield_now().await;
    }

    queue.enqueue(page_view(1, clock.now()));
    assert_eq!(queue.flush(false).await, FlushOutcome::Skipped);

    transport.gate.add_permits(1);
    assert_eq!(first.await.unwrap(), FlushOutcome::Delivered(1));
    // The event enqueued during the flight is still buffered
    assert_eq!(content_ids(&queue.pending()), vec!["c1"]);
}

#[tokio::test]
async fn test_dispatcher_flushes_critical_and_beacons_on_shutdown() {
    let transport = Arc::new(RecordingTransport::new());
    let queue = Arc::new(EventQueue::new(
        &collector_config(10, 60_000, 3),
        transport.clone(),
        readerpulse_core::clock::system_clock(),
    ));
    let shutdown = CancellationToken::new();
    let handle = Dispatcher::spawn(queue.clone(), shutdown.clone());

    let now = chrono::Utc::now();
    queue.enqueue(Event::new(EventType::ErrorOccurred, "s-1", "/a", now));
    for _ in 0..200 {
        if !transport.attempts().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(types(&transport.attempts()[0]), vec![EventType::ErrorOccurred]);

    queue.enqueue(page_view(7, now));
    shutdown.cancel();
    handle.await.unwrap();

    let beaconed: Vec<Event> = transport.beacons().concat();
    assert_eq!(content_ids(&beaconed), vec!["c7"]);
}

fn tracker(config: &PulseConfig) -> (ManualClock, Arc<EventQueue>, Tracker) {
    let (clock, shared) = manual_clock();
    let queue = Arc::new(EventQueue::new(
        &config.collector,
        Arc::new(RecordingTransport::new()),
        shared.clone(),
    ));
    let tracker = Tracker::new(
        config,
        queue.clone(),
        shared,
        Box::new(MemorySessionStore::new()),
        &RawEnvironment {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0".to_string(),
            viewport_width: 1280,
            viewport_height: 800,
            language: Some("en-GB".to_string()),
            timezone: Some("Europe/London".to_string()),
        },
    );
    (clock, queue, tracker)
}

#[tokio::test]
async fn test_tracker_starts_session_and_tags_events() {
    let (_clock, queue, mut tracker) = tracker(&PulseConfig::default());
    tracker.set_subject(Some("reader-1".to_string()));
    tracker.page_view("/articles/1", Some("c1".to_string()), None);

    let pending = queue.pending();
    assert_eq!(types(&pending), vec![EventType::SessionStart, EventType::PageView]);
    let session_id = tracker.session_id().unwrap().to_string();
    assert!(pending.iter().all(|e| e.session_id == session_id));
    assert_eq!(pending[1].content_id.as_deref(), Some("c1"));
    assert_eq!(pending[1].subject_id.as_deref(), Some("reader-1"));
    assert_eq!(pending[1].device_info.browser, tracker.device_info().browser);
}

#[tokio::test]
async fn test_withheld_consent_records_nothing() {
    let (_clock, queue, mut tracker) = tracker(&PulseConfig::default());
    tracker.set_consent(false);
    tracker.page_view("/articles/1", Some("c1".to_string()), None);
    tracker.click("cta", None);
    assert!(queue.pending().is_empty());

    tracker.set_consent(true);
    tracker.click("cta", None);
    assert_eq!(types(&queue.pending()), vec![EventType::SessionStart, EventType::Click]);
}

#[tokio::test]
async fn test_rate_limit_caps_non_critical_types() {
    let (_clock, queue, mut tracker) = tracker(&PulseConfig::default());
    for _ in 0..70 {
        tracker.click("button", None);
    }
    for _ in 0..3 {
        tracker.interact(Interaction::Like, Some("c1"), Map::new());
    }
    let pending = queue.pending();
    let clicks = pending.iter().filter(|e| e.event_type == EventType::Click).count();
    let likes = pending.iter().filter(|e| e.event_type == EventType::Like).count();
    assert_eq!(clicks, 60);
    assert_eq!(likes, 3);
}

#[tokio::test]
async fn test_scroll_maximum_spans_pages() {
    let (clock, queue, mut tracker) = tracker(&PulseConfig::default());
    let at = |top: f64| ScrollObservation {
        scroll_top: top,
        viewport_height: 100.0,
        document_height: 1000.0,
    };
    let depths = |events: &[Event]| -> Vec<u64> {
        events
            .iter()
            .filter(|e| e.event_type == EventType::ScrollDepth)
            .filter_map(|e| e.payload["depthPercent"].as_u64())
            .collect()
    };

    tracker.page_view("/a", None, None);
    tracker.observe_scroll(&at(400.0));
    assert_eq!(tracker.max_scroll_depth(), 50);

    // A shallower scroll on the next page neither lowers the maximum nor re-emits 25
    tracker.page_view("/b", None, None);
    tracker.observe_scroll(&at(200.0));
    assert_eq!(tracker.max_scroll_depth(), 50);
    tracker.observe_scroll(&at(700.0));
    assert_eq!(tracker.max_scroll_depth(), 80);
    assert_eq!(depths(&queue.pending()), vec![50, 75]);

    clock.advance(Duration::minutes(31));
    tracker.click("link", None);
    let ended = queue
        .pending()
        .into_iter()
        .find(|e| e.event_type == EventType::SessionEnd)
        .unwrap();
    assert_eq!(ended.payload["maxScrollDepthPercent"], 80);
}

#[tokio::test]
async fn test_idle_session_rotates() {
    let (clock, queue, mut tracker) = tracker(&PulseConfig::default());
    tracker.page_view("/a", None, None);
    let first = tracker.session_id().unwrap().to_string();

    clock.advance(Duration::minutes(31));
    tracker.click("link", None);
    let second = tracker.session_id().unwrap().to_string();
    assert_ne!(first, second);

    let pending = queue.pending();
    assert_eq!(
        types(&pending),
        vec![
            EventType::SessionStart,
            EventType::PageView,
            EventType::SessionEnd,
            EventType::SessionStart,
            EventType::Click,
        ]
    );
    assert_eq!(pending[2].session_id, first);
    assert_eq!(pending[2].payload["reason"], "timeout");
    assert!(pending.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_session_restored_from_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("session.json");
    let config = PulseConfig::default();
    let (clock, shared) = manual_clock();
    let env = RawEnvironment::default();

    let first_queue = Arc::new(EventQueue::new(&config.collector, Arc::new(RecordingTransport::new()), shared.clone()));
    let mut first = Tracker::new(&config, first_queue, shared.clone(), Box::new(JsonFileSessionStore::new(&path)), &env);
    first.page_view("/a", None, None);
    let session_id = first.session_id().unwrap().to_string();
    drop(first);

    clock.advance(Duration::minutes(10));
    let second_queue = Arc::new(EventQueue::new(&config.collector, Arc::new(RecordingTransport::new()), shared.clone()));
    let mut second = Tracker::new(&config, second_queue.clone(), shared, Box::new(JsonFileSessionStore::new(&path)), &env);
    second.page_view("/b", None, None);

    assert_eq!(second.session_id(), Some(session_id.as_str()));
    assert_eq!(types(&second_queue.pending()), vec![EventType::PageView]);
}

#[tokio::test]
async fn test_teardown_beacons_exit_and_reading_events() {
    let config = PulseConfig::default();
    let (clock, shared) = manual_clock();
    let transport = Arc::new(RecordingTransport::new());
    let queue = Arc::new(EventQueue::new(&config.collector, transport.clone(), shared.clone()));
    let mut tracker = Tracker::new(&config, queue.clone(), shared, Box::new(MemorySessionStore::new()), &RawEnvironment::default());

    tracker.page_view("/articles/9", Some("c9".to_string()), None);
    clock.advance(Duration::seconds(45));
    assert_eq!(tracker.teardown(), FlushOutcome::Beaconed(5));

    let beaconed = transport.beacons().concat();
    assert_eq!(
        types(&beaconed),
        vec![
            EventType::SessionStart,
            EventType::PageView,
            EventType::PageExit,
            EventType::ReadingTime,
            EventType::ReadingEnd,
        ]
    );
    assert_eq!(beaconed[2].payload["timeOnPageSeconds"], 45);
    assert_eq!(beaconed[4].payload["foregroundSeconds"], 45);
    assert!(queue.pending().is_empty());
}

#[tokio::test]
async fn test_errors_are_deduplicated() {
    let (clock, queue, mut tracker) = tracker(&PulseConfig::default());
    let report = ErrorReport {
        message: "TypeError: x is undefined".to_string(),
        stack: Some("at render (app.js:10)".to_string()),
        source: Some("app.js".to_string()),
        line: Some(10),
    };
    tracker.report_error(&report);
    tracker.report_error(&report);
    clock.advance(Duration::seconds(11));
    tracker.report_error(&report);

    let errors = queue
        .pending()
        .iter()
        .filter(|e| e.event_type == EventType::ErrorOccurred)
        .count();
    assert_eq!(errors, 2);
}
