//! Ubuntu Advantage desktop daemon library.
//!
//! Exposes the client tool's attachment state and services on D-Bus. The
//! binary wires these modules together; integration tests and fuzz targets
//! drive them directly.

pub mod authorization;
pub mod client;
pub mod config;
pub mod daemon;
pub mod dbus;
pub mod dispatcher;
pub mod panic_handler;
pub mod registry;
pub mod status;

// Re-export commonly used types for convenience
pub use config::Config;
pub use daemon::Daemon;
pub use registry::ObjectRegistry;
pub use status::Status;
