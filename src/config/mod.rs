use serde::Deserialize;
use std::env;

// Top-level container for every runtime setting.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payment: PaymentConfig,
    pub reaper: ReaperConfig,
    pub notify: NotifyConfig,
    pub permission: PermissionConfig,
    pub cron: CronConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

// Card-gateway settings: shared secret for the signed-parameter contract,
// plus the URLs the checkout redirect needs.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub gateway_url: String,
    pub gateway_secret: String,
    pub return_url: String,
    pub success_redirect: String,
    pub fail_redirect: String,
    pub bank_account: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// A PENDING/PENDING booking older than this is swept.
    pub timeout_minutes: i64,
    /// Interval of the in-process sweep loop.
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub dispatch_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    /// Shared secret the external scheduler sends in X-Cron-Secret.
    pub secret: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "coworking_booking=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
                pool_size: env::var("DB_POOL_SIZE")
                    .unwrap_or_else(|_| "20".to_string())
                    .parse()
                    .expect("DB_POOL_SIZE must be a valid number"),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").expect("REDIS_URL must be set"),
            },
            payment: PaymentConfig {
                gateway_url: env::var("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|_| "https://sandbox.gateway.example/pay".to_string()),
                gateway_secret: env::var("PAYMENT_GATEWAY_SECRET")
                    .expect("PAYMENT_GATEWAY_SECRET must be set"),
                return_url: env::var("PAYMENT_RETURN_URL")
                    .unwrap_or_else(|_| "https://your-domain.com/api/payment/return".to_string()),
                success_redirect: env::var("PAYMENT_SUCCESS_REDIRECT")
                    .unwrap_or_else(|_| "https://your-domain.com/booking/success".to_string()),
                fail_redirect: env::var("PAYMENT_FAIL_REDIRECT")
                    .unwrap_or_else(|_| "https://your-domain.com/booking/failed".to_string()),
                bank_account: env::var("BANK_ACCOUNT").unwrap_or_else(|_| "0000000000".to_string()),
            },
            reaper: ReaperConfig {
                timeout_minutes: env::var("REAPER_TIMEOUT_MINUTES")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .expect("REAPER_TIMEOUT_MINUTES must be a valid number"),
                interval_seconds: env::var("REAPER_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .expect("REAPER_INTERVAL_SECONDS must be a valid number"),
            },
            notify: NotifyConfig {
                dispatch_url: env::var("NOTIFY_DISPATCH_URL")
                    .unwrap_or_else(|_| "http://localhost:9100".to_string()),
            },
            permission: PermissionConfig {
                base_url: env::var("PERMISSION_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:9200".to_string()),
            },
            cron: CronConfig {
                secret: env::var("CRON_SECRET").expect("CRON_SECRET must be set"),
            },
        }
    }
}
