use std::time::Duration;

use crate::engine::EngineSettings;
use crate::models::slot::FacilityLayout;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// When unset the engine runs memory-only and nothing is persisted.
    pub database_url: Option<String>,
    pub admin_key: Option<String>,
    pub layout: FacilityLayout,
    /// Set via GATE_LOCK_TIMEOUT_MS. Default: 250.
    pub lock_timeout_ms: u64,
    /// Set via GATE_TOKEN_TTL_HOURS. Default: 24.
    pub token_ttl_hours: i64,
    /// Cadence of the proactive expiry sweep. 0 = disabled.
    /// Set via GATE_EXPIRY_SWEEP_SECS. Default: 300.
    pub expiry_sweep_secs: u64,
    /// Capacity of the sensor ingress queue.
    /// Set via GATE_SENSOR_QUEUE. Default: 1024.
    pub sensor_queue: usize,
}

impl Config {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            layout: self.layout,
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            token_ttl: chrono::Duration::hours(self.token_ttl_hours),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            admin_key: None,
            layout: FacilityLayout::default(),
            lock_timeout_ms: 250,
            token_ttl_hours: 24,
            expiry_sweep_secs: 300,
            sensor_queue: 1024,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();
    let cfg = Config {
        port: env_or("GATE_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        admin_key: std::env::var("GATE_ADMIN_KEY").ok().filter(|s| !s.is_empty()),
        layout: FacilityLayout {
            zone_a: env_or("GATE_ZONE_A_SLOTS", defaults.layout.zone_a),
            zone_b: env_or("GATE_ZONE_B_SLOTS", defaults.layout.zone_b),
            zone_c: env_or("GATE_ZONE_C_SLOTS", defaults.layout.zone_c),
        },
        lock_timeout_ms: env_or("GATE_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
        token_ttl_hours: env_or("GATE_TOKEN_TTL_HOURS", defaults.token_ttl_hours),
        expiry_sweep_secs: env_or("GATE_EXPIRY_SWEEP_SECS", defaults.expiry_sweep_secs),
        sensor_queue: env_or("GATE_SENSOR_QUEUE", defaults.sensor_queue),
    };

    if cfg.layout.total() == 0 {
        anyhow::bail!("facility has no parking slots; set GATE_ZONE_*_SLOTS");
    }
    if cfg.lock_timeout_ms == 0 {
        anyhow::bail!("GATE_LOCK_TIMEOUT_MS must be greater than zero");
    }
    if cfg.token_ttl_hours <= 0 {
        anyhow::bail!("GATE_TOKEN_TTL_HOURS must be positive");
    }
    if cfg.admin_key.is_none() {
        tracing::warn!("GATE_ADMIN_KEY is not set; administrative routes will refuse every request");
    }

    Ok(cfg)
}
