pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod token;

pub use middleware::require_auth;
