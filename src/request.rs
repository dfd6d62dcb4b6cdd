//! Data model for one tracked client request.

use strum::{
    Display,
    EnumIter,
};

/// Lifecycle of a request. Transitions are monotonic; a request never moves
/// backward.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum RequestState {
    #[default]
    New,
    Receiving,
    Retrieving,
    Replying,
    Finished,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Finished)
    }
}

/// What the cache decided for this request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CacheStatus {
    #[default]
    Unknown,
    Hit,
    Miss,
    Piped,
    HitPass,
}

/// One client request, keyed by its session/thread id. Fields other than
/// `session` and `state` are populated opportunistically as records arrive.
#[derive(Debug, Default, Clone)]
pub struct Request {
    pub session: u64,
    pub state: RequestState,
    pub client_ip: String,
    pub method: String,
    pub url: String,
    pub host: String,
    pub referrer: String,
    pub user_agent: String,
    pub status: Option<u16>,
    pub size: Option<u64>,
    pub backend: Option<String>,
    pub cached: CacheStatus,
    /// Seconds the server spent handling the request, set at finish.
    pub processing_time: Option<f64>,
    /// Wall-clock seconds from first to last byte, set at finish.
    pub lifecycle_time: Option<f64>,
    /// Ordered VCL call/return trace, kept for diagnostics only.
    pub vcl_sequence: Vec<String>,
    /// Source line number of the lifecycle-start record, for diagnostics.
    pub created_at_line: u64,
}

impl Request {
    /// A freshly created request enters `Receiving` immediately; `New` only
    /// exists as the implicit pre-creation state.
    pub fn new(session: u64, created_at_line: u64) -> Self {
        Self {
            session,
            state: RequestState::Receiving,
            created_at_line,
            ..Default::default()
        }
    }
}
