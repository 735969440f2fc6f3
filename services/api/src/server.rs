//! services/api/src/server.rs
//!
//! Builds the router and runs the HTTP server.
//!
//! The Telegram protocol client is supplied by the caller as a
//! [`TelegramConnector`] (the `api` binary passes the `layer-client` adapter);
//! the database, tokens, caches and background tasks are wired up here from
//! the [`Config`].

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use gallery_core::{GalleryService, TelegramConnector};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::adapters::DbAdapter;
use crate::config::{Config, ConfigError};
use crate::error::ApiError;
use crate::web::{
    auth::{auth_status_handler, logout_handler, send_code_handler, verify_handler},
    require_auth,
    rest::{
        create_group_handler, delete_group_handler, delete_photo_handler, full_photo_handler,
        list_photos_handler, my_groups_handler, thumb_photo_handler, upload_handler, ApiDoc,
    },
    state::AppState,
    token::TokenIssuer,
};

/// Upper bound on how long an expired login attempt can linger before the
/// purge task notices it.
const MAX_PURGE_PERIOD: Duration = Duration::from_secs(60);

/// Builds the API router with every route and layer except CORS.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/login/send-code", post(send_code_handler))
        .route("/api/login/verify", post(verify_handler));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/api/auth/status", get(auth_status_handler))
        .route("/api/logout", post(logout_handler))
        .route("/api/photos", get(list_photos_handler))
        .route("/api/photos/{id}", delete(delete_photo_handler))
        .route("/api/photos/{id}/full", get(full_photo_handler))
        .route("/api/photos/{id}/thumb", get(thumb_photo_handler))
        .route("/api/upload", post(upload_handler))
        .route("/api/groups", post(create_group_handler))
        .route("/api/groups/{id}", delete(delete_group_handler))
        .route("/api/my-groups", get(my_groups_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .with_state(state)
}

fn cors_layer(config: &Config) -> Result<CorsLayer, ConfigError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    match &config.cors_origin {
        Some(origin) => {
            let origin = origin.parse::<HeaderValue>().map_err(|e| {
                ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string())
            })?;
            Ok(cors.allow_origin(origin).allow_credentials(true))
        }
        None => Ok(cors.allow_origin(Any)),
    }
}

/// Installs the global `tracing` subscriber. A second call is a no-op.
pub fn init_tracing(config: &Config) {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Runs the server until Ctrl-C or SIGTERM, then tears down every live
/// Telegram client.
pub async fn serve(config: Config, connector: Arc<dyn TelegramConnector>) -> Result<(), ApiError> {
    // --- 1. Logging ---
    let config = Arc::new(config);
    init_tracing(&config);
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Build the Shared AppState ---
    let gallery = Arc::new(GalleryService::new(connector, db_adapter));
    let tokens = Arc::new(TokenIssuer::new(
        config.jwt_secret.as_bytes(),
        chrono::Duration::days(config.token_ttl_days),
    ));
    let app_state = Arc::new(AppState {
        config: config.clone(),
        gallery: gallery.clone(),
        tokens,
    });

    // --- 4. Background Tasks ---
    let attempt_ttl = chrono::Duration::from_std(Duration::from_secs(config.login_attempt_ttl_secs))
        .map_err(|e| ConfigError::InvalidValue("LOGIN_ATTEMPT_TTL_SECS".to_string(), e.to_string()))?;
    let cancel = CancellationToken::new();
    let purge_task = tokio::spawn(purge_login_attempts(
        gallery.clone(),
        attempt_ttl,
        cancel.clone(),
    ));

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(router(app_state))
        .layer(cors_layer(&config)?)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- 7. Teardown ---
    cancel.cancel();
    if let Err(e) = purge_task.await {
        warn!("Login purge task ended abnormally: {:?}", e);
    }
    gallery.shutdown().await;
    info!("Server stopped.");

    served.map_err(ApiError::from)
}

/// Periodically tears down login attempts older than `ttl` until cancelled.
async fn purge_login_attempts(
    gallery: Arc<GalleryService>,
    ttl: chrono::Duration,
    cancel: CancellationToken,
) {
    let period = ttl
        .to_std()
        .unwrap_or(MAX_PURGE_PERIOD)
        .clamp(Duration::from_secs(1), MAX_PURGE_PERIOD);
    let mut ticker = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let purged = gallery.purge_expired_logins(ttl).await;
                if purged > 0 {
                    info!(purged, "Expired login attempts closed");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
