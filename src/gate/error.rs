use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Window size must be at least 1")]
    ZeroWindow,

    #[error("Backpressure gate closed")]
    Closed,
}

pub type GateResult<T> = Result<T, GateError>;
