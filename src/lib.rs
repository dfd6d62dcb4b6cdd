//! # Varnish Request Tracker
//!
//! Consumes a `varnishlog`-style transaction log, reconstructs per-request
//! state machines keyed by the session id, and emits rolling latency
//! percentiles and request counts as plain-text metric lines.
//!
//! ## Architecture
//!
//! The tracker is built from small, independently testable pieces that the
//! [`Manager`] wires together:
//!
//! - **`source`**: Log source abstraction (`varnishlog` child process, log
//!   file, or stdin) that can be closed from another thread
//! - **`tokenizer`**: Parses fixed-format log lines into [`Record`]s
//! - **`tracker`**: Applies records to per-session request state machines
//! - **`registry`**: Mutex-guarded store of in-flight and finished requests
//! - **`stats`**: Percentile math and the periodic [`StatsReporter`]
//! - **`manager`**: Owns the log source and the two worker threads
//!
//! Two long-lived workers share the [`RequestRegistry`]: a driver thread that
//! pulls tokenized records and applies state transitions, and a reporter
//! thread that drains finished requests once per interval and emits
//! statistics. All shared access goes through one mutex with short critical
//! sections.

#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod manager;
pub mod registry;
pub mod request;
pub mod source;
pub mod stats;
pub mod tokenizer;
pub mod tracker;

pub use config::Config;
pub use error::TrackerError;
pub use manager::Manager;
pub use registry::RequestRegistry;
pub use request::{
    CacheStatus,
    Request,
    RequestState,
};
pub use source::{
    CommandSource,
    LogSource,
    ReaderSource,
    SourceCloser,
};
pub use stats::{
    percentile,
    MemorySink,
    MetricSink,
    StatsReporter,
    StdoutSink,
};
pub use tokenizer::{
    Record,
    Tokenizer,
};
pub use tracker::RequestTracker;
