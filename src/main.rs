use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coworking_booking::{config::Config, controllers, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.app.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting coworking booking API");

    let app_state = AppState::new(config.clone())
        .await
        .expect("Failed to initialize application state");
    info!("Database and Redis connected");

    // In-process expiry sweep; the /api/cron/sweep endpoint runs the same
    // pass for deployments that prefer an external scheduler.
    let reaper = app_state.reaper.clone();
    let sweep_interval = Duration::from_secs(config.reaper.interval_seconds);
    task::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            match reaper.sweep().await {
                Ok(report) if report.cancelled > 0 || report.errors > 0 => {
                    info!(
                        "expiry sweep: {} cancelled, {} errors",
                        report.cancelled, report.errors
                    );
                }
                Ok(_) => {}
                Err(e) => error!("expiry sweep failed: {}", e),
            }
        }
    });

    let app = Router::new()
        .route("/", get(|| async { "Coworking Booking API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app.into_make_service())
        .await
        .expect("Server error");
}
