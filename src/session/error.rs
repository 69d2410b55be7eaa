use crate::gate::GateError;
use crate::payload::PayloadError;
use thiserror::Error;

/// Coarse failure classification used for log targets and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Write/read failure, short read, closed or reset connection
    Transport,
    /// Reference payload could not be generated
    Randomness,
    /// Received content differed from the reference payload
    Integrity,
    /// Task panic or invalid session parameters
    Fault,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Randomness => "randomness",
            FailureKind::Integrity => "integrity",
            FailureKind::Fault => "fault",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Write failed at chunk {chunk}: {source}")]
    Write {
        chunk: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Read failed at chunk {chunk}: {source}")]
    Read {
        chunk: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed before chunk {chunk} was complete ({expected} bytes expected)")]
    ShortRead { chunk: u64, expected: usize },

    #[error("Reference payload unavailable: {0}")]
    Payload(#[from] PayloadError),

    #[error("Backpressure gate error: {0}")]
    Gate(#[from] GateError),

    #[error("Chunk {chunk} did not match the reference payload")]
    IntegrityMismatch { chunk: u64 },

    #[error("{task} task aborted: {reason}")]
    TaskPanicked { task: &'static str, reason: String },
}

impl SessionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::Write { .. }
            | SessionError::Read { .. }
            | SessionError::ShortRead { .. } => FailureKind::Transport,
            SessionError::Payload(PayloadError::EmptyPayload) => FailureKind::Fault,
            SessionError::Payload(_) => FailureKind::Randomness,
            SessionError::IntegrityMismatch { .. } => FailureKind::Integrity,
            SessionError::Gate(_) | SessionError::TaskPanicked { .. } => FailureKind::Fault,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
