use crate::request::RequestState;
use thiserror::Error;

/// Failure taxonomy for the tracker core.
///
/// Malformed records are recoverable (logged and skipped by the driver);
/// everything else is fatal to the log stream being processed. Records for
/// unknown sessions are not represented here at all: a client that opened a
/// connection and aborted before issuing a request is expected traffic, not
/// an error.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A line that cannot be tokenized into the fixed-format fields.
    #[error("line {line}: malformed log record: {text:?}")]
    MalformedRecord { line: u64, text: String },

    /// A record implies a transition that is illegal from the request's
    /// current state. Continuing would emit corrupted statistics, so this
    /// halts processing of the stream.
    #[error("line {line}: session {session}: tag {tag} illegal in state {state}")]
    StateViolation {
        line: u64,
        session: u64,
        tag: String,
        state: RequestState,
    },

    /// A lifecycle-start record for a session id that is already active.
    #[error("line {line}: session {session} is already active")]
    DuplicateSession { line: u64, session: u64 },

    /// Failed to read the next line from the log source.
    #[error("failed to read from log source")]
    Source(#[from] std::io::Error),

    #[error("{0} thread panicked")]
    WorkerPanicked(&'static str),
}
