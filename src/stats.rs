//! Percentile computation and periodic statistics reporting.
//!
//! The reporter runs on its own thread and emits one line per statistic per
//! tick, in the sink format `<metric-name> <epoch-seconds> <value>` with
//! optional trailing `key=value` tags. All computation happens on private
//! copies obtained from the registry, never under its lock.

use crate::{
    registry::RequestRegistry,
    request::RequestState,
};
use std::sync::{
    Arc,
    Mutex,
};
use strum::IntoEnumIterator;

/// Value at percentile `p` (0.0..=1.0) of an ascending-sorted slice, using
/// linear interpolation between the two nearest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let rank = (sorted.len() - 1) as f64 * p;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

/// Destination for formatted metric lines.
pub trait MetricSink: Send {
    fn emit(&mut self, line: &str);
}

/// Writes metric lines to stdout, one per call. Logging goes to stderr, so
/// stdout stays machine-readable.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl MetricSink for StdoutSink {
    fn emit(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Collects metric lines in memory; shared handle for inspection in tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl MetricSink for MemorySink {
    fn emit(&mut self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}

const QUANTILES: [(f64, &str); 3] = [(0.5, "50"), (0.95, "95"), (0.99, "99")];

/// Periodically drains finished requests and emits counts and latency
/// percentiles.
pub struct StatsReporter {
    registry: RequestRegistry,
    sink: Box<dyn MetricSink>,
    prefix: String,
    tags: Vec<(String, String)>,
}

impl StatsReporter {
    pub fn new(registry: RequestRegistry, sink: Box<dyn MetricSink>, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            sink,
            prefix: prefix.into(),
            tags: Vec::new(),
        }
    }

    /// Static tags appended to every emitted line.
    pub fn with_tags(mut self, tags: Vec<(String, String)>) -> Self {
        self.tags = tags;
        self
    }

    /// One reporting tick against the current wall clock.
    pub fn report(&mut self) {
        self.report_at(chrono::Utc::now().timestamp());
    }

    pub(crate) fn report_at(&mut self, now: i64) {
        let finished = self.registry.pop_finished();
        self.emit_count("completed", now, finished.len(), &[]);

        if !finished.is_empty() {
            let processing: Vec<f64> = finished.iter().filter_map(|r| r.processing_time).collect();
            let lifecycle: Vec<f64> = finished.iter().filter_map(|r| r.lifecycle_time).collect();
            self.emit_percentiles("processing_time", now, processing);
            self.emit_percentiles("lifecycle_time", now, lifecycle);
        }

        let active = self.registry.snapshot_active();
        self.emit_count("pending", now, active.len(), &[]);
        for state in RequestState::iter() {
            let count = active.iter().filter(|r| r.state == state).count();
            self.emit_count("pending", now, count, &[("state", &state.to_string())]);
        }

        debug!(completed = finished.len(), pending = active.len(), "reporter tick");
    }

    fn emit_percentiles(&mut self, name: &str, now: i64, mut samples: Vec<f64>) {
        samples.sort_by(f64::total_cmp);
        for (p, label) in QUANTILES {
            let value = percentile(&samples, p);
            self.emit_line(name, now, format!("{value:.6}"), &[("quantile", label)]);
        }
    }

    fn emit_count(&mut self, name: &str, now: i64, count: usize, tags: &[(&str, &str)]) {
        self.emit_line(name, now, count.to_string(), tags);
    }

    fn emit_line(&mut self, name: &str, now: i64, value: String, tags: &[(&str, &str)]) {
        let mut line = format!("{}.{name} {now} {value}", self.prefix);
        for (key, value) in tags {
            line.push_str(&format!(" {key}={value}"));
        }
        for (key, value) in &self.tags {
            line.push_str(&format!(" {key}={value}"));
        }
        self.sink.emit(&line);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn percentile_interpolates_between_ranks() {
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 0.5), 3.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.0), 1.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 1.0), 4.0);
        assert_eq!(percentile(&[7.5], 0.95), 7.5);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    fn finish_request(registry: &RequestRegistry, session: u64, processing: f64, lifecycle: f64) {
        registry.create(session, 1).unwrap();
        registry
            .update(session, |request| {
                request.processing_time = Some(processing);
                request.lifecycle_time = Some(lifecycle);
                request.state = RequestState::Finished;
            })
            .unwrap();
        registry.mark_finished(session);
    }

    /// Extract `value` from lines like `prefix.name 1000 0.300000 quantile=50`.
    fn value_of<'a>(lines: &'a [String], name: &str, tag: &str) -> &'a str {
        let line = lines
            .iter()
            .find(|l| l.starts_with(name) && l.ends_with(tag))
            .unwrap_or_else(|| panic!("no line for {name} {tag} in {lines:?}"));
        line.split_whitespace().nth(2).unwrap()
    }

    #[test]
    fn reporter_matches_percentile_reference() {
        let registry = RequestRegistry::new();
        let sink = MemorySink::new();
        let mut reporter = StatsReporter::new(registry.clone(), Box::new(sink.clone()), "cache.requests");

        let samples = [0.1, 0.2, 0.3, 0.4, 0.5];
        for (i, sample) in samples.iter().enumerate() {
            finish_request(&registry, i as u64 + 1, *sample, *sample * 2.0);
        }
        reporter.report_at(1000);

        let lines = sink.lines();
        assert_eq!(value_of(&lines, "cache.requests.completed", "1000 5"), "5");
        for (p, label) in QUANTILES {
            assert_eq!(
                value_of(&lines, "cache.requests.processing_time", &format!("quantile={label}")),
                format!("{:.6}", percentile(&samples, p)),
            );
            let doubled: Vec<f64> = samples.iter().map(|s| s * 2.0).collect();
            assert_eq!(
                value_of(&lines, "cache.requests.lifecycle_time", &format!("quantile={label}")),
                format!("{:.6}", percentile(&doubled, p)),
            );
        }
    }

    #[test]
    fn empty_tick_skips_percentiles_but_keeps_counts() {
        let registry = RequestRegistry::new();
        registry.create(9, 1).unwrap();

        let sink = MemorySink::new();
        let mut reporter = StatsReporter::new(registry.clone(), Box::new(sink.clone()), "cache.requests");
        reporter.report_at(2000);

        let lines = sink.lines();
        assert!(lines.contains(&"cache.requests.completed 2000 0".to_string()));
        assert!(lines.contains(&"cache.requests.pending 2000 1".to_string()));
        assert!(lines.contains(&"cache.requests.pending 2000 1 state=receiving".to_string()));
        assert!(lines.contains(&"cache.requests.pending 2000 0 state=finished".to_string()));
        assert!(!lines.iter().any(|l| l.contains("processing_time")));
        // completed + pending + one line per lifecycle state
        assert_eq!(lines.len(), 7);
    }

    #[test]
    fn static_tags_land_on_every_line() {
        let registry = RequestRegistry::new();
        let sink = MemorySink::new();
        let mut reporter = StatsReporter::new(registry.clone(), Box::new(sink.clone()), "cache.requests")
            .with_tags(vec![("host".to_string(), "cache01".to_string())]);
        reporter.report_at(3000);

        let lines = sink.lines();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.ends_with("host=cache01")));
    }
}
