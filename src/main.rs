use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seat_sync::{
    config::Config,
    error::ConfigError,
    services::PaymentHandlers,
    ApiClient, SessionDeps, ShowtimeSession, SeatStatus, WsTransport,
};

// Один экран - один логический поток: все колбэки сессии выполняются по очереди
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let showtime_id = std::env::args()
        .nth(1)
        .or_else(|| config.app.showtime_id.clone())
        .ok_or(ConfigError::Missing("SHOWTIME_ID"))?;

    info!(environment = %config.app.environment, %showtime_id, "Starting seat-sync watcher");

    let api = Arc::new(
        ApiClient::from_config(&config.api, &config.circuit_breaker)
            .context("Failed to create api client")?,
    );
    let transport = Arc::new(WsTransport::new(config.events.ws_url.clone()));
    let deps = SessionDeps::new(transport, api.clone(), api);

    let session = ShowtimeSession::open(&config, showtime_id, deps)
        .await
        .context("Failed to load seat map")?;

    if let Some(payment_id) = config.app.payment_id.clone() {
        let handlers = PaymentHandlers::new()
            .on_success(|tx| info!(transaction_id = ?tx, "💳 payment succeeded"))
            .on_failure(|reason| warn!(reason = ?reason, "💳 payment failed"))
            .on_timeout(|| warn!("💳 payment outcome unknown, contact support"));
        session.watch_payment(payment_id, handlers);
    }

    let mut seats = session.seat_changes();
    let mut connection = session.watch_connection();
    let mut conflicts = session.conflict_changes();

    log_summary(&session);
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            changed = seats.changed() => {
                if changed.is_err() { break; }
                log_summary(&session);
            }
            changed = connection.changed() => {
                if changed.is_err() { break; }
                let state = *connection.borrow_and_update();
                info!(?state, fallback = ?session.fallback_mode(), "connection state changed");
            }
            changed = conflicts.changed() => {
                if changed.is_err() { break; }
                if session.has_conflicts() {
                    warn!(seats = ?session.conflicts(), "selected seats were taken");
                }
            }
        }
    }

    session.teardown();
    info!("Shutting down");
    Ok(())
}

fn log_summary(session: &ShowtimeSession) {
    let seats = session.seats();
    let count = |status: SeatStatus| seats.iter().filter(|s| s.status == status).count();
    info!(
        total = seats.len(),
        available = count(SeatStatus::Available),
        held = count(SeatStatus::Held),
        booked = count(SeatStatus::Booked),
        blocked = count(SeatStatus::Blocked),
        live = session.is_live(),
        "seat map updated"
    );
}
