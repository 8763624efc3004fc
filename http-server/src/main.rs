use anyhow::Context;
use axum::{
    Router,
    routing::{any, get, post},
};
use crash_engine::CrashEngine;
use crash_engine::types::{GameEvent, TransactionStatus};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

mod config;
mod error;
mod game_loop;
mod middleware;
mod models;
mod routes;
mod service;
mod websocket;

use config::Config;
use models::Database;
use routes::admin::{get_pending, resolve_transaction, set_override};
use routes::history::{get_history, get_round};
use routes::users::{get_transactions, login};
use websocket::websocket_handler;

const EVENT_BUFFER: usize = 1024;

// Application state shared by the game loop and every connection
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<CrashEngine>>,
    pub db: Database,
    pub events: broadcast::Sender<GameEvent>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        let engine = match config.rng_seed {
            Some(seed) => CrashEngine::with_seed(config.engine_config(), seed),
            None => CrashEngine::new(config.engine_config()),
        };
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            engine: Arc::new(Mutex::new(engine)),
            db,
            events,
            config: Arc::new(config),
        }
    }

    /// Reloads crash history and the pending transaction book from the store
    pub async fn restore(&self) -> anyhow::Result<()> {
        let cap = self.engine().history().cap();
        let history = self
            .db
            .recent_history(cap)
            .await
            .context("load crash history")?;
        let pending = self
            .db
            .find_transactions_by_status(TransactionStatus::Pending)
            .await
            .context("load pending transactions")?;
        let next_id = self
            .db
            .next_transaction_id()
            .await
            .context("load transaction id sequence")?;

        tracing::info!(
            history = history.len(),
            pending = pending.len(),
            next_id,
            "state restored from store"
        );
        self.engine().restore(history, pending, next_id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // initialize tracing, RUST_LOG controls the filter
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let db = Database::open(&config.db_path)
        .with_context(|| format!("open database at {}", config.db_path))?;
    tracing::info!(path = %config.db_path, "database opened");

    let addr = config.listen_addr();
    let state = AppState::new(config, db);
    state.restore().await?;

    tokio::spawn(game_loop::run(state.clone()));

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/round", get(get_round))
        .route("/history", get(get_history))
        .route("/login", post(login))
        .route("/users/{username}/transactions", get(get_transactions))
        .route("/admin/pending", get(get_pending))
        .route("/admin/transactions/{id}", post(resolve_transaction))
        .route("/admin/override", post(set_override))
        .route("/ws", any(websocket_handler))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// Root endpoint
async fn root() -> &'static str {
    "Crash Game API - WebSocket /ws for the live round and wallet, GET /history for recent crashes, POST /login to open an account"
}
