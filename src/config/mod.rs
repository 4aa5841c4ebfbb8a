use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub upstream: UpstreamConfig,
    pub resolver: ResolverConfig,
    pub balancer: BalancerConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

/// The Emby server fronted by this proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

/// The external file-resolution service that issues delivery links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Trailing telemetry window used for scoring, in hours
    pub score_window_hours: i64,
    /// Below this many samples a route falls back to its configured weight
    pub min_samples: usize,
    /// Per-client hourly request ceiling exposed by the abuse signal
    pub abuse_max_requests_per_hour: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Telemetry older than this many days is purged
    pub days: i64,
    /// Six-field cron expression for the scheduled sweep
    pub cron: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://./emby-balance.db".to_string(),
                max_connections: Some(10),
            },
            web: WebConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            upstream: UpstreamConfig {
                url: "http://localhost:8096".to_string(),
                api_key: String::new(),
                connect_timeout_secs: 5,
                read_timeout_secs: 10,
            },
            resolver: ResolverConfig {
                url: "http://127.0.0.1:19798".to_string(),
            },
            balancer: BalancerConfig {
                score_window_hours: 24,
                min_samples: 5,
                abuse_max_requests_per_hour: 100,
            },
            retention: RetentionConfig {
                days: 7,
                cron: "0 0 2 * * *".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());

        if std::path::Path::new(&config_file).exists() {
            let contents = std::fs::read_to_string(&config_file)?;
            Ok(toml::from_str(&contents)?)
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_file, contents)?;
            Ok(default_config)
        }
    }
}
