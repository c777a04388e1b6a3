//! HTTP server setup and routing

use crate::error::{Error, Result};
use crate::predictor::PumpPredictor;
use crate::state::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub predictor: Arc<dyn PumpPredictor>,
    /// Mount `/api/test/*`
    pub test_endpoints: bool,
}

/// Build the router
///
/// Test injection routes exist only when `ctx.test_endpoints` is set; with it
/// off they fall through to 404.
pub fn create_router(ctx: AppContext) -> Router {
    let mut api: Router<AppContext> = Router::new()
        .route("/status", get(super::handlers::get_status))
        .route("/ai-status", get(super::handlers::get_ai_status))
        .route("/start-pump", post(super::handlers::start_pump))
        .route("/stop-pump", post(super::handlers::stop_pump))
        .route("/manual-override", post(super::handlers::set_manual_override))
        .route("/reset-system", post(super::handlers::reset_system))
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::get_build_info))
        .route("/events", get(super::sse::event_stream));

    if ctx.test_endpoints {
        api = api
            .route("/test/set-water-level", post(super::handlers::set_water_level))
            .route("/test/simulate-scenario", post(super::handlers::simulate_scenario));
    }

    Router::new()
        .nest("/api", api)
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Dashboard is served from another origin
        .layer(CorsLayer::permissive())
}

/// Serve until `shutdown` resolves
pub async fn run<F>(ctx: AppContext, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(ctx);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
