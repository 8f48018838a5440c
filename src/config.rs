use serde::Deserialize;

use crate::models::trend::TtlConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Key for the maintenance API (invalidation, sweep).
    pub admin_key: String,
    /// Cache TTL per timeframe, seconds.
    pub ttl_7d_secs: u64,
    pub ttl_30d_secs: u64,
    pub ttl_90d_secs: u64,
    pub ttl_1y_secs: u64,
    /// How long a reader waits behind an in-flight refresh (ms).
    pub refresh_wait_ms: u64,
    /// Retry attempts when the metrics store is unreachable.
    pub refresh_retries: u32,
    /// Base backoff between retries (ms).
    pub refresh_backoff_ms: u64,
    /// Expiry sweep cadence (seconds).
    pub sweep_interval_secs: u64,
    /// "See own rows" carve-out: when true, callers may read workspaces
    /// where they authored executions even without membership. Off by
    /// default; enabling it is a product decision with security weight.
    pub allow_self_scope: bool,
}

impl Config {
    pub fn ttls(&self) -> TtlConfig {
        TtlConfig {
            secs_7d: self.ttl_7d_secs,
            secs_30d: self.ttl_30d_secs,
            secs_90d: self.ttl_90d_secs,
            secs_1y: self.ttl_1y_secs,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let admin_key = std::env::var("TRENDLINE_ADMIN_KEY")
        .unwrap_or_else(|_| "CHANGE_ME_ADMIN_KEY".into());

    if admin_key == "CHANGE_ME_ADMIN_KEY" {
        let env_mode = std::env::var("TRENDLINE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "TRENDLINE_ADMIN_KEY is still the insecure placeholder. \
                 Set a proper key before running in production."
            );
        }
        eprintln!("⚠️  TRENDLINE_ADMIN_KEY is not set — using insecure placeholder. Set a real key for production.");
    }

    Ok(Config {
        port: env_parse("TRENDLINE_PORT", 8090),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/trendline".into()),
        admin_key,
        ttl_7d_secs: env_parse("TRENDLINE_TTL_7D_SECS", 900),
        ttl_30d_secs: env_parse("TRENDLINE_TTL_30D_SECS", 1800),
        ttl_90d_secs: env_parse("TRENDLINE_TTL_90D_SECS", 3600),
        ttl_1y_secs: env_parse("TRENDLINE_TTL_1Y_SECS", 21600),
        refresh_wait_ms: env_parse("TRENDLINE_REFRESH_WAIT_MS", 5000),
        refresh_retries: env_parse("TRENDLINE_REFRESH_RETRIES", 2),
        refresh_backoff_ms: env_parse("TRENDLINE_REFRESH_BACKOFF_MS", 200),
        sweep_interval_secs: env_parse("TRENDLINE_SWEEP_INTERVAL_SECS", 300),
        allow_self_scope: std::env::var("TRENDLINE_ALLOW_SELF_SCOPE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    })
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
