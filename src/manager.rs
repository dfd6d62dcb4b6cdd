//! Thread lifecycle for the tracker.
//!
//! The [`Manager`] owns the log source and two workers: a driver thread that
//! pulls tokenized records and applies them until the source is exhausted or
//! stop is requested, and a reporter thread that reports once per interval.
//! Cancellation is cooperative through a shared stop flag; closing the log
//! source additionally unblocks a driver stuck in a blocking read.

use crate::{
    error::TrackerError,
    registry::RequestRegistry,
    source::{
        LogSource,
        SourceCloser,
    },
    stats::StatsReporter,
    tokenizer::Tokenizer,
    tracker::RequestTracker,
};
use std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering::Relaxed,
        },
        Arc,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::Duration,
};

/// Clonable handle for requesting shutdown from outside the manager, e.g.
/// from a signal handler thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
    closer: SourceCloser,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Relaxed);
        self.closer.close();
    }
}

pub struct Manager {
    stop: Arc<AtomicBool>,
    closer: SourceCloser,
    interval: Duration,
    // Consumed by start().
    tokenizer: Option<Tokenizer>,
    tracker: Option<RequestTracker>,
    reporter: Option<StatsReporter>,
    driver: Option<JoinHandle<Result<(), TrackerError>>>,
    reporter_thread: Option<JoinHandle<()>>,
}

impl Manager {
    pub fn new(
        source: Box<dyn LogSource>,
        registry: RequestRegistry,
        reporter: StatsReporter,
        interval: Duration,
    ) -> Self {
        let closer = source.closer();
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            closer,
            interval,
            tokenizer: Some(Tokenizer::new(source)),
            tracker: Some(RequestTracker::new(registry)),
            reporter: Some(reporter),
            driver: None,
            reporter_thread: None,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            closer: self.closer.clone(),
        }
    }

    /// Launch the driver and reporter threads and return to the caller.
    pub fn start(&mut self) -> Result<(), TrackerError> {
        let (Some(tokenizer), Some(tracker), Some(mut reporter)) = (
            self.tokenizer.take(),
            self.tracker.take(),
            self.reporter.take(),
        ) else {
            return Ok(());
        };

        let stop = self.stop.clone();
        self.driver = Some(
            thread::Builder::new()
                .name("driver".to_string())
                .spawn(move || {
                    let result = drive(tokenizer, tracker, &stop);
                    if let Err(err) = &result {
                        error!(%err, "driver failed");
                    }
                    // Driver gone means nothing will finish anymore; let the
                    // reporter flush and exit.
                    stop.store(true, Relaxed);
                    result
                })?,
        );

        let stop = self.stop.clone();
        let interval = self.interval;
        self.reporter_thread = Some(
            thread::Builder::new()
                .name("reporter".to_string())
                .spawn(move || {
                    while !stop.load(Relaxed) {
                        reporter.report();
                        thread::sleep(interval);
                    }
                    // Final drain so the last batch is not lost.
                    reporter.report();
                })?,
        );

        info!(interval = ?self.interval, "tracker started");
        Ok(())
    }

    /// Request cooperative shutdown of both workers.
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Join the driver first, then the reporter, so the final report
    /// observes the driver's last finished requests.
    pub fn wait(&mut self) -> Result<(), TrackerError> {
        let driver_result = match self.driver.take() {
            Some(handle) => handle.join().map_err(|_| TrackerError::WorkerPanicked("driver"))?,
            None => Ok(()),
        };
        self.stop.store(true, Relaxed);
        if let Some(handle) = self.reporter_thread.take() {
            handle.join().map_err(|_| TrackerError::WorkerPanicked("reporter"))?;
        }
        driver_result
    }

    /// Run until the log source is exhausted or [`Manager::stop`] is called
    /// from elsewhere.
    pub fn run(&mut self) -> Result<(), TrackerError> {
        self.start()?;
        self.wait()
    }
}

fn drive(
    mut tokenizer: Tokenizer,
    tracker: RequestTracker,
    stop: &AtomicBool,
) -> Result<(), TrackerError> {
    let mut processed: u64 = 0;
    while !stop.load(Relaxed) {
        match tokenizer.next_record() {
            Ok(Some(record)) => match tracker.apply(&record) {
                Ok(_) => processed += 1,
                // Recoverable: the line is garbage but the stream is fine.
                Err(TrackerError::MalformedRecord { line, text }) => {
                    warn!(line, text, "skipping malformed record");
                }
                Err(err) => return Err(err),
            },
            Ok(None) => break,
            Err(TrackerError::MalformedRecord { line, text }) => {
                warn!(line, text, "skipping malformed record");
            }
            Err(err) => return Err(err),
        }
    }
    debug!(processed, "log stream drained");
    Ok(())
}
