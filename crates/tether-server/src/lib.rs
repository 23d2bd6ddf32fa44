//! # tether-server
//!
//! The tether gateway: configuration, token authentication, the per
//! connection client session and the HTTP surface around the realtime core.
//!
//! ```rust,ignore
//! let config = tether_server::config::Config::load()?;
//! config.validate()?;
//! tether_server::handlers::run_server(config).await?;
//! ```

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod session;

pub use config::Config;
pub use handlers::{build_router, run_server, AppState};
