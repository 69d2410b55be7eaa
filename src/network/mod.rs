pub mod acceptor;
pub mod client;
pub mod error;
pub mod tls;

pub use acceptor::Acceptor;
pub use client::{connect, run_echo, EchoSummary};
pub use error::{NetworkError, NetworkResult};
pub use tls::{client_config, self_signed, server_config, ClientTrust, SelfSignedCert};
