//! Client-resident event collection pipeline
//!
//! - Context profiling and session tracking
//! - Instrumentation watchers (scroll, reading, performance, errors, unload)
//! - Ordered, retrying event queue with a teardown beacon
//! - Tracker facade with consent gating, rate limiting and payload sanitizing

pub mod hooks;
pub mod profiler;
pub mod queue;
pub mod session;
pub mod tracker;
pub mod transport;

pub use hooks::{Emission, ErrorReport, LoadTiming, PaintMetric, ScrollObservation};
pub use profiler::{profile, RawEnvironment};
pub use queue::{Dispatcher, EventQueue, FlushOutcome, FlushTrigger, QueueStats};
pub use session::{JsonFileSessionStore, MemorySessionStore, SessionRegister, SessionStore};
pub use tracker::{sanitize, Interaction, RateLimiter, Tracker};
pub use transport::{HttpTransport, Transport};
