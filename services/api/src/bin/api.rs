//! services/api/src/bin/api.rs

use api_lib::{
    adapters::LayerConnector,
    config::{Config, ConfigError},
    error::ApiError,
    server,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration ---
    let config = Config::from_env()?;

    // --- 2. Initialize the Telegram Adapter ---
    let api_id = config
        .telegram_api_id
        .ok_or_else(|| ConfigError::MissingVar("TG_API_ID".to_string()))?;
    let api_hash = config
        .telegram_api_hash
        .clone()
        .ok_or_else(|| ConfigError::MissingVar("TG_API_HASH".to_string()))?;
    let connector = Arc::new(LayerConnector::new(api_id, api_hash));

    // --- 3. Run the Server ---
    server::serve(config, connector).await
}
