//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::web::token::TokenIssuer;
use gallery_core::GalleryService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gallery: Arc<GalleryService>,
    pub tokens: Arc<TokenIssuer>,
}
