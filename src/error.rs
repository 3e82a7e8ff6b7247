/// Error taxonomy for a generation session.
///
/// Three tiers, handled very differently:
/// - `Rejection`: a submission that never left the session (empty prompt, or a
///   generation already in flight). Always a silent no-op for the user.
/// - `GenerationError`: the generator round failed. The session moves to
///   `Failed` and keeps the message for display; history is untouched.
/// - `SessionError`: a timeline operation was called with bad input. A missing
///   snapshot id is a caller bug, not a user-facing path.
use thiserror::Error;

use crate::versions::SnapshotId;

// ── Rejection ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("prompt is empty")]
    EmptyInput,
    #[error("a generation is already in flight")]
    Busy,
}

// ── GenerationError ───────────────────────────────────────────────────────────

/// Why a generation round produced no snapshot.
///
/// Stored inside `SessionState::Failed`, so it owns plain strings rather than
/// the underlying transport error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Connection refused, DNS, timeout, or the body stream broke mid-read
    #[error("could not reach the generator: {0}")]
    Transport(String),
    /// Generator answered with a non-success HTTP status
    #[error("generator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// Generator answered with an explicit error payload
    #[error("generator reported an error: {0}")]
    Upstream(String),
    /// Reply was empty or could not be decoded
    #[error("generator reply was malformed: {0}")]
    Malformed(String),
    /// Reply decoded fine but carried zero document fragments
    #[error("generator produced no UI")]
    EmptyResult,
}

/// Coarse failure category for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Upstream,
    EmptyResult,
}

impl GenerationError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GenerationError::Transport(_) => FailureKind::Transport,
            GenerationError::Status { .. }
            | GenerationError::Upstream(_)
            | GenerationError::Malformed(_) => FailureKind::Upstream,
            GenerationError::EmptyResult => FailureKind::EmptyResult,
        }
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => GenerationError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => GenerationError::Transport(e.to_string()),
        }
    }
}

// ── SessionError ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("snapshot {0} is not in the version store")]
    SnapshotNotFound(SnapshotId),
    #[error(transparent)]
    Rejected(#[from] Rejection),
}
