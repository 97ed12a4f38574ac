use std::net::SocketAddr;
use std::sync::Arc;

use dorma_api::metrics::EngineMetrics;
use dorma_api::state::{AppState, AuthSettings};
use dorma_api::sweeper::run_hold_sweeper;
use dorma_api::app;
use dorma_domain::payment::{MockPaymentProvider, PaymentProvider};
use dorma_domain::repository::{BookingStore, UnitStore};
use dorma_engine::{
    BookingOrchestrator, BookingRules, ChangeFeed, HoldManager, PaymentReconciler,
};
use dorma_ledger::AvailabilityLedger;
use dorma_store::{Config, InMemoryStore, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dorma_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Dorma API on port {}", config.server.port);

    let (bookings, units): (Arc<dyn BookingStore>, Arc<dyn UnitStore>) =
        if config.database.url.starts_with("postgres") {
            let pg = Arc::new(
                PgStore::connect(&config.database.url, config.database.max_connections)
                    .await
                    .expect("Failed to connect to Postgres"),
            );
            pg.migrate().await.expect("Failed to run migrations");
            (pg.clone() as Arc<dyn BookingStore>, pg as Arc<dyn UnitStore>)
        } else {
            tracing::warn!("using in-memory store, state will not survive restarts");
            let mem = Arc::new(InMemoryStore::new());
            (
                mem.clone() as Arc<dyn BookingStore>,
                mem as Arc<dyn UnitStore>,
            )
        };

    let ledger = Arc::new(AvailabilityLedger::new());
    let feed = ChangeFeed::new(128);
    let payments: Arc<dyn PaymentProvider> = Arc::new(MockPaymentProvider::new());

    let holds = Arc::new(HoldManager::new(
        ledger.clone(),
        bookings.clone(),
        units.clone(),
        feed.clone(),
    ));

    let rules = BookingRules {
        hold_ttl: chrono::Duration::hours(config.booking.hold_ttl_hours),
        currency: config.booking.currency.clone(),
    };

    let orchestrator = Arc::new(BookingOrchestrator::new(
        bookings.clone(),
        units.clone(),
        holds.clone(),
        payments.clone(),
        feed.clone(),
        rules,
    ));

    let reconciler = Arc::new(PaymentReconciler::new(
        bookings.clone(),
        holds.clone(),
        payments,
        feed.clone(),
    ));

    let metrics = Arc::new(EngineMetrics::new().expect("Failed to build metrics registry"));

    // Hold deadlines live in the store; re-seed the ledger and let the
    // sweeper pick up anything that came due while we were down.
    holds.recover().await.expect("Failed to recover ledger");
    tokio::spawn(run_hold_sweeper(
        holds.clone(),
        metrics.clone(),
        config.booking.sweep_interval_seconds,
    ));

    let app_state = AppState {
        bookings,
        ledger,
        holds,
        orchestrator,
        reconciler,
        feed,
        auth: AuthSettings {
            secret: config.auth.jwt_secret.clone(),
            expiration_seconds: config.auth.jwt_expiration_seconds,
        },
        metrics,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
