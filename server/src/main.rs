mod app;
mod claim;
mod config;
mod conquest;
mod db_migrations;
mod db_sqlx;
mod error;
mod geofence;
mod geometry;
mod powers;
mod quests;
mod routes;
mod services;
mod session;
mod state;
mod store;
mod trail;

extern crate self as sqlx;
pub use crate::db_sqlx::{
    Error, PgPool, PgRow, Postgres, QueryBuilder, Row, Transaction, postgres, query, query_as,
    query_scalar,
};

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let database_url = match std::env::var("DATABASE_URL") {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("DATABASE_URL is required to run landrush-server");
            return;
        }
    };
    let db_max_connections = config::db_max_connections();
    tracing::info!(db_max_connections, "Connecting to PostgreSQL...");
    let db = match PgPoolOptions::new()
        .max_connections(db_max_connections)
        .acquire_timeout(config::db_acquire_timeout())
        .connect(&database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to PostgreSQL");
            return;
        }
    };
    if let Err(e) = db_migrations::run(&db).await {
        tracing::error!(error = %e, "failed to run migrations");
        return;
    }
    tracing::info!("Database connected and migrations applied");

    let state = AppState::new(db);

    match state.geofence.load(&state.db).await {
        Ok(count) => tracing::info!(zones = count, "Geofence cache hydrated"),
        Err(e) => {
            tracing::error!(error = %e, "failed to load geofence zones");
            return;
        }
    }
    match store::load_chests(&state.db).await {
        Ok(chests) => {
            tracing::info!(chests = chests.len(), "Superpower chests hydrated");
            let mut map = state.chests.write().await;
            for chest in chests {
                map.insert(chest.id, chest);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to load superpower chests");
            return;
        }
    }

    // Spawn background services
    tokio::spawn(services::ticker::run(state.clone()));
    tokio::spawn(services::sweeper::run(state.clone()));

    let app = app::build_app(state);

    let addr = format!("0.0.0.0:{}", config::SERVER_PORT);
    tracing::info!("Landrush server listening on {addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind TCP listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server failed");
    }

    tracing::info!("Server shut down gracefully");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
