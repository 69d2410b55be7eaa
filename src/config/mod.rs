//! Harness and relay configuration
//!
//! Configuration is loaded from a TOML file (default: `harness.toml`) and
//! then overridden from the command line by the binaries.

pub mod error;
pub mod loader;
pub mod types;

pub use error::{ConfigError, ConfigResult};
pub use types::{
    CertSource, HarnessConfig, MismatchPolicy, RelayConfig, VerifyMode, DEFAULT_CHUNK_SIZE,
    DEFAULT_WINDOW,
};
