pub mod availability;
pub mod config;
pub mod controllers;
pub mod database;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod permission_client;
pub mod pricing;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;

use crate::notifier::HttpNotifier;
use crate::permission_client::HttpPermissionClient;
use crate::pricing::TariffCatalog;
use crate::services::bookings::BookingService;
use crate::services::reaper::ExpiryReaper;
use crate::services::reconcile::ReconcileService;
use crate::store::postgres::PgBookingStore;

// Shared state for the whole application.
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub config: config::Config,
    pub bookings: Arc<BookingService>,
    pub reconcile: Arc<ReconcileService>,
    pub reaper: Arc<ExpiryReaper>,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;
        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;

        let store = Arc::new(PgBookingStore::new(db.clone()));
        let notifier = Arc::new(HttpNotifier::from_config(&config.notify)?);
        let permissions = Arc::new(HttpPermissionClient::from_config(&config.permission)?);
        let tariffs = Arc::new(TariffCatalog::default());

        let reconcile = Arc::new(ReconcileService::new(
            store.clone(),
            notifier.clone(),
            config.payment.clone(),
        ));
        let bookings = Arc::new(BookingService::new(
            store.clone(),
            tariffs,
            notifier.clone(),
            permissions,
            reconcile.clone(),
        ));
        let reaper = Arc::new(ExpiryReaper::new(
            store,
            notifier,
            Some(redis.clone()),
            config.reaper.clone(),
        ));

        Ok(Arc::new(Self {
            db,
            redis,
            config,
            bookings,
            reconcile,
            reaper,
        }))
    }
}
