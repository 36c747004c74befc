//! Backend for the personal-site widgets: a guestbook comment log and
//! consent-based visit analytics, persisted in a shared key-value namespace.
//!
//! Every endpoint is a stateless handler doing a read-modify-write (or plain
//! read) against Redis. There is no session state and no cross-request
//! coordination; concurrent writers race and the last write wins.

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod comments;
pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod state;
pub mod utils;
pub mod visits;

use routes::{
    activity_handler, comments_get_handler, comments_post_handler, summary_handler, visit_handler,
};
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let origin = if state.config.allowed_origin == "*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::exact(
            state
                .config
                .allowed_origin
                .parse()
                .expect("Invalid ALLOWED_ORIGIN"),
        )
    };

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60 * 24));

    Router::new()
        .route(
            "/comments",
            get(comments_get_handler).post(comments_post_handler),
        )
        .route("/visit", post(visit_handler))
        .route("/visits/summary", get(summary_handler))
        .route("/visits/activity", get(activity_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");

    let app = build_router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    // Deferred visit writes must land before the process exits.
    info!("Draining deferred writes...");
    state.drain().await;

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
