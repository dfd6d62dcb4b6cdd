//! Per-request state machine.
//!
//! Applies tokenized records to the request of the matching session id.
//! Records for sessions without a prior `ReqStart` are silently dropped:
//! clients routinely open a connection and abort before issuing a request,
//! and their trailing records are expected traffic. A record that is illegal
//! from the request's current state is an unrecoverable consistency fault
//! and halts the stream.

use crate::{
    error::TrackerError,
    registry::RequestRegistry,
    request::{
        CacheStatus,
        Request,
        RequestState,
    },
    tokenizer::Record,
};

/// What `apply` did with a record, mostly for the driver's debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The record mutated (or created) a request.
    Updated,
    /// The record completed a request and moved it to the finished queue.
    Finished,
    /// Session marker, unknown tag, or unknown session id.
    Ignored,
}

/// Drives request state machines from incoming records. Only ever called
/// from the single driver thread, so records within one session are applied
/// strictly in arrival order.
pub struct RequestTracker {
    registry: RequestRegistry,
}

impl RequestTracker {
    pub fn new(registry: RequestRegistry) -> Self {
        Self { registry }
    }

    pub fn apply(&self, record: &Record) -> Result<Applied, TrackerError> {
        match record.tag.as_str() {
            "ReqStart" => {
                self.registry.create(record.session, record.line)?;
                let client_ip = first_word(&record.args).to_string();
                let _ = self.registry.update(record.session, |request| {
                    request.client_ip = client_ip;
                });
                Ok(Applied::Updated)
            }
            // Connection bookkeeping, not request-scoped work.
            "SessionOpen" | "SessionClose" | "StatSess" => Ok(Applied::Ignored),
            _ => self.apply_to_existing(record),
        }
    }

    fn apply_to_existing(&self, record: &Record) -> Result<Applied, TrackerError> {
        let Some(transitioned) = self
            .registry
            .update(record.session, |request| transition(request, record))
        else {
            // No prior ReqStart: the client aborted before issuing a request.
            trace!(
                session = record.session,
                tag = %record.tag,
                "dropping record for unknown session"
            );
            return Ok(Applied::Ignored);
        };

        if transitioned? == RequestState::Finished {
            self.registry.mark_finished(record.session);
            return Ok(Applied::Finished);
        }
        Ok(Applied::Updated)
    }
}

/// Apply one record to one request. Pure apart from the `&mut`; runs under
/// the registry lock, so it must not block or allocate more than it has to.
fn transition(request: &mut Request, record: &Record) -> Result<RequestState, TrackerError> {
    use RequestState::{
        Receiving,
        Replying,
        Retrieving,
    };

    let args = record.args.as_str();
    match record.tag.as_str() {
        "RxRequest" => {
            require(request, record, &[Receiving, Retrieving])?;
            request.method = args.trim().to_string();
        }
        "RxURL" => {
            require(request, record, &[Receiving, Retrieving])?;
            request.url = args.trim().to_string();
        }
        "RxProtocol" => {
            require(request, record, &[Receiving, Retrieving])?;
        }
        "RxHeader" => {
            require(request, record, &[Receiving, Retrieving])?;
            if let Some((name, value)) = split_header(args) {
                match name {
                    name if name.eq_ignore_ascii_case("host") => request.host = value.to_string(),
                    name if name.eq_ignore_ascii_case("referer") => {
                        request.referrer = value.to_string()
                    }
                    name if name.eq_ignore_ascii_case("user-agent") => {
                        request.user_agent = value.to_string()
                    }
                    _ => {}
                }
            }
        }
        "VCL_call" => match first_word(args) {
            "hit" => {
                require(request, record, &[Receiving, Retrieving])?;
                request.cached = CacheStatus::Hit;
            }
            "miss" | "pass" | "fetch" => {
                require(request, record, &[Receiving, Retrieving])?;
                request.cached = CacheStatus::Miss;
                request.state = Retrieving;
            }
            "pipe" => {
                require(request, record, &[Receiving])?;
                request.cached = CacheStatus::Piped;
                request.state = Retrieving;
            }
            subroutine => {
                require_non_terminal(request, record)?;
                request.vcl_sequence.push(format!("call {subroutine}"));
            }
        },
        "VCL_return" => {
            require_non_terminal(request, record)?;
            request.vcl_sequence.push(format!("return {}", first_word(args)));
        }
        "HitPass" => {
            require_non_terminal(request, record)?;
            request.cached = CacheStatus::HitPass;
        }
        "TxProtocol" => {
            require(request, record, &[Receiving, Retrieving])?;
            request.state = Replying;
        }
        "TxStatus" => {
            require_non_terminal(request, record)?;
            if let Ok(status) = args.trim().parse() {
                request.status = Some(status);
            }
        }
        "TxHeader" => {
            require_non_terminal(request, record)?;
            if let Some((name, value)) = split_header(args) {
                if name.eq_ignore_ascii_case("content-length") {
                    request.size = value.parse().ok();
                }
            }
        }
        "Backend" => {
            require_non_terminal(request, record)?;
            if let Some(name) = args.split_whitespace().last() {
                request.backend = Some(name.to_string());
            }
        }
        "ReqEnd" => {
            require(request, record, &[Replying, Retrieving])?;
            let (lifecycle, processing) = parse_req_end(record)?;
            request.lifecycle_time = Some(lifecycle);
            request.processing_time = Some(processing);
            request.state = RequestState::Finished;
        }
        tag => {
            // Tags the tracker has no use for (TxResponse, Length, ...).
            trace!(session = record.session, tag, "ignoring tag");
        }
    }

    Ok(request.state)
}

/// `ReqEnd` args are `xid t_start t_end t_processing ...`; the timestamps
/// are opaque floats taken from the log format as-is.
fn parse_req_end(record: &Record) -> Result<(f64, f64), TrackerError> {
    let malformed = || TrackerError::MalformedRecord {
        line: record.line,
        text: format!("{} {}", record.tag, record.args),
    };

    let mut fields = record.args.split_whitespace().skip(1);
    let t_start: f64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
    let t_end: f64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
    let t_processing: f64 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(malformed)?;
    Ok((t_end - t_start, t_processing))
}

fn require(
    request: &Request,
    record: &Record,
    allowed: &[RequestState],
) -> Result<(), TrackerError> {
    if allowed.contains(&request.state) {
        return Ok(());
    }
    Err(TrackerError::StateViolation {
        line: record.line,
        session: record.session,
        tag: record.tag.clone(),
        state: request.state,
    })
}

fn require_non_terminal(request: &Request, record: &Record) -> Result<(), TrackerError> {
    if request.state.is_terminal() {
        return Err(TrackerError::StateViolation {
            line: record.line,
            session: record.session,
            tag: record.tag.clone(),
            state: request.state,
        });
    }
    Ok(())
}

fn first_word(args: &str) -> &str {
    args.split_whitespace().next().unwrap_or("")
}

/// `"Host: example.com"` -> `("Host", "example.com")`
fn split_header(args: &str) -> Option<(&str, &str)> {
    let (name, value) = args.split_once(':')?;
    Some((name.trim(), value.trim()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tokenizer::format_line;
    use pretty_assertions::assert_eq;

    fn record(session: u64, tag: &str, args: &str) -> Record {
        Record {
            line: 0,
            session,
            tag: tag.to_string(),
            args: args.to_string(),
        }
    }

    fn apply_all(tracker: &RequestTracker, records: &[Record]) {
        for r in records {
            tracker.apply(r).unwrap();
        }
    }

    #[test]
    fn pass_request_runs_through_full_lifecycle() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        apply_all(
            &tracker,
            &[
                record(7, "ReqStart", "127.0.0.1 50866 100001"),
                record(7, "RxRequest", "GET"),
                record(7, "RxURL", "/index.html"),
                record(7, "RxHeader", "Host: example.com"),
                record(7, "VCL_call", "pass"),
                record(7, "TxProtocol", "HTTP/1.1"),
                record(7, "TxStatus", "200"),
                record(7, "ReqEnd", "100001 100.0 100.05 0.05"),
            ],
        );

        assert!(registry.get(7).is_none());
        let finished = registry.pop_finished();
        assert_eq!(finished.len(), 1);

        let request = &finished[0];
        assert_eq!(request.state, RequestState::Finished);
        assert_eq!(request.cached, CacheStatus::Miss);
        assert_eq!(request.status, Some(200));
        assert_eq!(request.client_ip, "127.0.0.1");
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "/index.html");
        assert_eq!(request.host, "example.com");
        assert!((request.processing_time.unwrap() - 0.05).abs() < 1e-9);
        assert!((request.lifecycle_time.unwrap() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn hit_keeps_request_in_receiving() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        apply_all(
            &tracker,
            &[
                record(3, "ReqStart", "10.0.0.1 1234 100002"),
                record(3, "VCL_call", "hit"),
            ],
        );

        let request = registry.get(3).unwrap();
        assert_eq!(request.state, RequestState::Receiving);
        assert_eq!(request.cached, CacheStatus::Hit);
    }

    #[test]
    fn vcl_trace_is_recorded_in_order() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        apply_all(
            &tracker,
            &[
                record(3, "ReqStart", "10.0.0.1 1234 100002"),
                record(3, "VCL_call", "recv"),
                record(3, "VCL_return", "lookup"),
                record(3, "VCL_call", "miss"),
                record(3, "VCL_return", "fetch"),
            ],
        );

        let request = registry.get(3).unwrap();
        assert_eq!(
            request.vcl_sequence,
            ["call recv", "return lookup", "return fetch"]
        );
        assert_eq!(request.state, RequestState::Retrieving);
        assert_eq!(request.cached, CacheStatus::Miss);
    }

    #[test]
    fn records_for_unknown_session_are_dropped() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        // No prior ReqStart for session 42: the client aborted early.
        let applied = tracker
            .apply(&record(42, "ReqEnd", "100003 100.0 100.1 0.1"))
            .unwrap();

        assert_eq!(applied, Applied::Ignored);
        assert!(registry.pop_finished().is_empty());
        assert_eq!(registry.active_len(), 0);
    }

    #[test]
    fn reply_before_request_phase_is_a_state_violation() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        tracker
            .apply(&record(5, "ReqStart", "10.0.0.2 1234 100004"))
            .unwrap();
        tracker.apply(&record(5, "TxProtocol", "HTTP/1.1")).unwrap();

        // The request phase is over once the reply has started.
        let err = tracker.apply(&record(5, "RxRequest", "GET")).unwrap_err();
        match err {
            TrackerError::StateViolation { session, state, tag, .. } => {
                assert_eq!(session, 5);
                assert_eq!(state, RequestState::Replying);
                assert_eq!(tag, "RxRequest");
            }
            other => panic!("expected state violation, got {other:?}"),
        }
        // The violating request never reaches the finished queue.
        assert!(registry.pop_finished().is_empty());
    }

    #[test]
    fn unparseable_req_end_leaves_request_active() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        apply_all(
            &tracker,
            &[
                record(7, "ReqStart", "127.0.0.1 50866 100001"),
                record(7, "VCL_call", "pass"),
                record(7, "TxProtocol", "HTTP/1.1"),
            ],
        );

        let err = tracker
            .apply(&record(7, "ReqEnd", "100001 garbage garbage garbage"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::MalformedRecord { .. }));

        // The request survives the bad line and can still finish normally.
        assert_eq!(registry.get(7).unwrap().state, RequestState::Replying);
        assert!(registry.pop_finished().is_empty());

        tracker
            .apply(&record(7, "ReqEnd", "100001 100.0 100.05 0.05"))
            .unwrap();
        assert_eq!(registry.pop_finished().len(), 1);
    }

    #[test]
    fn duplicate_req_start_is_rejected() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        tracker
            .apply(&record(5, "ReqStart", "10.0.0.2 1234 100004"))
            .unwrap();
        assert!(matches!(
            tracker.apply(&record(5, "ReqStart", "10.0.0.2 1234 100005")),
            Err(TrackerError::DuplicateSession { session: 5, .. })
        ));
    }

    #[test]
    fn content_length_and_backend_are_annotated() {
        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());

        apply_all(
            &tracker,
            &[
                record(6, "ReqStart", "10.0.0.3 1234 100006"),
                record(6, "Backend", "32 default default"),
                record(6, "TxProtocol", "HTTP/1.1"),
                record(6, "TxHeader", "Content-Length: 4096"),
            ],
        );

        let request = registry.get(6).unwrap();
        assert_eq!(request.size, Some(4096));
        assert_eq!(request.backend.as_deref(), Some("default"));
    }

    #[test]
    fn format_line_round_trips_through_tokenizer() {
        use crate::{
            source::ReaderSource,
            tokenizer::Tokenizer,
        };
        use std::io::Cursor;

        let line = format_line(7, "ReqStart", 'c', "127.0.0.1 50866 100001");
        let mut tokenizer = Tokenizer::new(Box::new(ReaderSource::new(Cursor::new(line))));
        let record = tokenizer.next_record().unwrap().unwrap();

        let registry = RequestRegistry::new();
        let tracker = RequestTracker::new(registry.clone());
        tracker.apply(&record).unwrap();
        assert_eq!(registry.get(7).unwrap().client_ip, "127.0.0.1");
    }
}
