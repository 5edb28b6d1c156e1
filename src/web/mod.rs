//! Web server module: REST snapshots and the realtime websocket feed.

mod handlers;

use crate::model::CheckResult;
use crate::monitor::MonitorEngine;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: MonitorEngine,
    pub realtime_tx: broadcast::Sender<CheckResult>,
}

/// Register a listener forwarding every processed result into the
/// realtime broadcast channel. A lagging websocket subscriber drops
/// old results instead of back-pressuring the engine.
pub fn register_realtime_listener(engine: &MonitorEngine, tx: broadcast::Sender<CheckResult>) {
    engine.add_listener(Arc::new(move |result: &CheckResult| {
        // Send only fails when no subscriber is connected.
        let _ = tx.send(result.clone());
    }));
}

/// API server exposing the engine's query surface.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(port: u16, engine: MonitorEngine, realtime_tx: broadcast::Sender<CheckResult>) -> Self {
        Self {
            state: AppState {
                engine,
                realtime_tx,
            },
            port,
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/monitors", get(handlers::handle_monitors))
            .route("/monitor/{id}", get(handlers::handle_monitor))
            .route("/monitor/{id}/history", get(handlers::handle_history))
            .route("/realtime/", get(handlers::handle_realtime))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
