pub mod session_registry;

pub use session_registry::GatewayRegistry;
