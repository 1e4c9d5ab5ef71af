//! Axum-based HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

fn api_routes() -> Router<Arc<GatewayState>> {
    let routes = Router::new()
        .route("/ping", get(api::ping))
        .route("/get", get(api::get_grid))
        .route("/set", post(api::set_cell))
        .route("/count", get(api::count))
        .route("/clients", get(api::clients))
        .route("/kick", post(api::kick))
        .route("/ws", get(ws_handler));

    #[cfg(feature = "metrics")]
    let routes = routes.route("/metrics", get(api::metrics));

    routes
}

/// Build the full router. Every route is served at the root and again under `/api`.
pub fn router(state: Arc<GatewayState>) -> Router {
    let mut app = Router::new()
        .merge(api_routes())
        .nest("/api", api_routes());

    if let Some(dir) = state.config.static_dir() {
        info!(dir = %dir.display(), "Serving static files");
        app = app.fallback_service(ServeDir::new(dir));
    }

    let mut app = app.with_state(state.clone()).layer(TraceLayer::new_for_http());

    if state.config.cors_enabled() {
        app = app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    app
}

/// Start the gateway server and run until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{port}", state.config.bind_addr());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(origin): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket, origin))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(%e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
