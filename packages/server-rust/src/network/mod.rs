//! HTTP middleware stack and listener for hosting the audit layer.

pub mod config;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use middleware::build_http_layers;
pub use module::{shutdown_signal, NetworkModule};
