use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Payload size must be greater than zero")]
    EmptyPayload,

    #[error("Randomness source failed to supply {requested} bytes: {reason}")]
    RandomnessUnavailable { requested: usize, reason: String },
}

pub type PayloadResult<T> = Result<T, PayloadError>;
