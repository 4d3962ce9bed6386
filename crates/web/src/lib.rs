//! CraftCloud Web API
//!
//! Registration, login and the ownership-checked relays between the
//! presentation layer and the upstream game-server panel.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use config::WebServerConfig;
pub use error::ApiError;
pub use server::{AppState, WebServer};
