//! Role-based client connector for Hyperledger Fabric gateway peers.
//!
//! Each organizational role (farmer, lab, manufacturer, ...) gets its own
//! [`GatewaySession`]: an X.509 identity, a signer for its private key and a
//! TLS channel to the role's gateway peer. Sessions are kept in a
//! [`GatewayRegistry`] and expose `submit` (endorse, submit and wait for
//! commit) and `evaluate` (read-only query).

pub mod config;
pub mod error;
pub mod gateway;
pub mod network;
pub mod pki;
pub mod protos;
pub mod registry;

pub use config::{ConnectorConfig, GatewayConfig, Timeouts};
pub use error::{GatewayError, Result, SetupStep, TransactionErrorKind};
pub use gateway::{CommitStatus, GatewaySession, ValidationCode};
pub use network::{GatewayTransport, SecureChannelFactory};
pub use pki::{Identity, Signer};
pub use registry::GatewayRegistry;
