//! Control server binary for the cascade workflow engine.

mod config;
mod error;
mod routes;
mod state;

use config::ServerConfig;
use state::AppState;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    let addr = config.bind_addr();

    let state = AppState::new(&config);
    let shutdown = state.shutdown.clone();
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received");
                }
            }
        })
        .await
        .expect("server error");
}
