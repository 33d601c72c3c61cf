pub mod proposal;
pub mod session;

pub use session::{CommitStatus, GatewaySession, ValidationCode};
