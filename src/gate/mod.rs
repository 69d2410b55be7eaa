pub mod backpressure;
pub mod error;

pub use backpressure::BackpressureGate;
pub use error::{GateError, GateResult};
