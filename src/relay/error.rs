use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Relay hub has stopped")]
    HubStopped,

    #[error("Failed to bind relay listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Relay server error: {0}")]
    Serve(#[source] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
