pub mod error;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod session;
pub mod shutdown;
pub mod types;

pub use error::{FailureKind, SessionError, SessionResult};
pub use receiver::INTEGRITY_TARGET;
pub use registry::{ActiveSession, SessionRegistry};
pub use session::Session;
pub use shutdown::{Shutdown, ShutdownListener};
pub use types::{
    SessionId, SessionOutcome, SessionReport, SessionSettings, SessionStats, TaskExit,
};
