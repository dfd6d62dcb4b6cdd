//! Fixed-format log line parsing.
//!
//! `varnishlog` emits one record per line with fixed column offsets:
//!
//! ```text
//!   713 RxHeader     c Host: example.com
//!   ^^^ ^^^^^^^^     ^ ^^^^^^^^^^^^^^^^^
//!   id  tag          | args
//!                    record type ('c' client, 'b' backend, '-' global)
//! ```
//!
//! Only client records are forwarded; backend and session-global records are
//! dropped, as is the sentinel session id `0` ("not request-scoped"). An
//! empty line ends the stream; the tokenizer is lazy and not restartable
//! once exhausted.

use crate::{
    error::TrackerError,
    source::LogSource,
};

const ID_END: usize = 5;
const TAG_START: usize = 6;
const TAG_END: usize = 18;
const TYPE_COL: usize = 19;
const ARGS_START: usize = 21;

/// Record-type code for client-side transactions.
const CLIENT: &str = "c";

/// Session id marking records that are not scoped to any request.
const NOT_REQUEST_SCOPED: u64 = 0;

/// One structured log record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// 1-based source line number, for diagnostics.
    pub line: u64,
    /// Session/thread id grouping all records of one client request.
    pub session: u64,
    /// Function/tag name, e.g. `ReqStart`.
    pub tag: String,
    /// Free-form argument text.
    pub args: String,
}

/// Turns raw log lines into [`Record`]s.
pub struct Tokenizer {
    source: Box<dyn LogSource>,
    line: u64,
    done: bool,
}

impl Tokenizer {
    pub fn new(source: Box<dyn LogSource>) -> Self {
        Self {
            source,
            line: 0,
            done: false,
        }
    }

    /// Next client-side record, skipping records the tracker does not
    /// consume. `Ok(None)` means the stream has ended; a
    /// [`TrackerError::MalformedRecord`] leaves the stream usable, so the
    /// caller may log and keep pulling.
    pub fn next_record(&mut self) -> Result<Option<Record>, TrackerError> {
        while !self.done {
            let Some(raw) = self.source.next_line()? else {
                self.done = true;
                break;
            };
            self.line += 1;

            if raw.trim().is_empty() {
                self.done = true;
                break;
            }

            let record = self.parse(&raw)?;
            let Some(record) = record else {
                continue;
            };
            return Ok(Some(record));
        }
        Ok(None)
    }

    /// `Ok(None)` when the line is well-formed but not ours (backend record,
    /// sentinel session id).
    fn parse(&self, raw: &str) -> Result<Option<Record>, TrackerError> {
        let malformed = || TrackerError::MalformedRecord {
            line: self.line,
            text: raw.to_string(),
        };

        let id_field = raw.get(..ID_END).ok_or_else(malformed)?;
        let session: u64 = id_field.trim().parse().map_err(|_| malformed())?;
        let tag = raw.get(TAG_START..TAG_END).ok_or_else(malformed)?.trim();
        let record_type = raw.get(TYPE_COL..TYPE_COL + 1).ok_or_else(malformed)?;

        if record_type != CLIENT || session == NOT_REQUEST_SCOPED {
            return Ok(None);
        }

        Ok(Some(Record {
            line: self.line,
            session,
            tag: tag.to_string(),
            args: raw.get(ARGS_START..).unwrap_or("").to_string(),
        }))
    }
}

#[cfg(test)]
pub(crate) fn format_line(session: u64, tag: &str, record_type: char, args: &str) -> String {
    format!("{session:5} {tag:<12} {record_type} {args}")
}
