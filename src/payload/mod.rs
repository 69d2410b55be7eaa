pub mod error;
pub mod generator;

pub use error::{PayloadError, PayloadResult};
pub use generator::{generate, ReferencePayload};
