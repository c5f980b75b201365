use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

pub const DEV_JWT_SECRET: &str = "tabelogo-development-secret-change-me-please";
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Parser, Clone, Debug)]
#[clap(name = "tabelogo", version, about = "Tabelogo restaurant discovery backend")]
pub struct Cli {
    #[clap(flatten)]
    pub config: Config,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Run the auth service
    Auth,
    /// Run the map service (Quick Search / Advance Search)
    Map,
    /// Run the restaurant service
    Restaurant,
    /// Run the spider (Tabelog scraping) service
    Spider,
    /// Run the mock Google Places API
    MockMap,
    /// Run every service in one process
    All,
    /// Look a place up on Tabelog through a running spider service
    TabelogSearch(TabelogSearchArgs),
}

#[derive(Args, Clone, Debug)]
pub struct TabelogSearchArgs {
    #[clap(long)]
    pub google_id: String,
    #[clap(long)]
    pub area: String,
    #[clap(long)]
    pub place_name: String,
    #[clap(env, long, default_value = "http://localhost:8084")]
    pub spider_service_url: String,
    #[clap(env, long, default_value_t = 30)]
    pub spider_client_timeout_secs: u64,
}

#[derive(Args, Clone, Debug)]
pub struct Config {
    #[clap(env, long, default_value = "development")]
    pub environment: String,
    #[clap(env, long, default_value = "info")]
    pub log_level: String,
    #[clap(env, long, default_value = "0.0.0.0")]
    pub host: String,
    #[clap(env, long, default_value = "http://localhost:3000")]
    pub origin_urls: String,
    #[clap(env, long, default_value_t = 1024)]
    pub max_concurrent_requests: usize,
    #[clap(env, long, default_value_t = 100)]
    pub rate_limit_per_minute: u32,

    #[clap(flatten)]
    pub database: DatabaseConfig,
    #[clap(flatten)]
    pub auth: AuthConfig,
    #[clap(flatten)]
    pub map: MapConfig,
    #[clap(flatten)]
    pub restaurant: RestaurantConfig,
    #[clap(flatten)]
    pub spider: SpiderConfig,
    #[clap(flatten)]
    pub mock_map: MockMapConfig,
}

#[derive(Args, Clone, Debug)]
pub struct DatabaseConfig {
    #[clap(env, long, default_value = "localhost")]
    pub db_host: String,
    #[clap(env, long, default_value_t = 5432)]
    pub db_port: u16,
    #[clap(env, long)]
    pub db_name: Option<String>,
    #[clap(env, long, default_value = "postgres")]
    pub db_user: String,
    #[clap(env, long, default_value = "")]
    pub db_password: String,
    #[clap(env, long, default_value_t = 10)]
    pub db_pool_size: u32,
}

#[derive(Args, Clone, Debug)]
pub struct AuthConfig {
    #[clap(env, long, default_value_t = 8081)]
    pub auth_port: u16,
    #[clap(env, long)]
    pub jwt_secret: Option<String>,
    #[clap(env, long, default_value_t = 15)]
    pub jwt_access_token_expire_minutes: i64,
    #[clap(env, long, default_value_t = 24)]
    pub jwt_refresh_token_expire_hours: i64,
}

#[derive(Args, Clone, Debug)]
pub struct MapConfig {
    #[clap(env, long, default_value_t = 8082)]
    pub map_port: u16,
    #[clap(env, long, default_value = "")]
    pub google_maps_api_key: String,
    #[clap(env, long, default_value = "https://places.googleapis.com")]
    pub places_base_url: String,
    #[clap(env, long)]
    pub use_mock_api: bool,
    #[clap(env, long)]
    pub mock_api_base_url: Option<String>,
    #[clap(env, long, default_value_t = 3600)]
    pub place_cache_ttl_secs: u64,
}

#[derive(Args, Clone, Debug)]
pub struct RestaurantConfig {
    #[clap(env, long, default_value_t = 8083)]
    pub restaurant_port: u16,
    #[clap(env, long, default_value = "http://localhost:8082")]
    pub map_service_url: String,
    #[clap(env, long, default_value_t = 3 * 24 * 60 * 60)]
    pub data_freshness_ttl_secs: u64,
}

#[derive(Args, Clone, Debug)]
pub struct SpiderConfig {
    #[clap(env, long, default_value_t = 8084)]
    pub spider_port: u16,
    #[clap(env, long)]
    pub spider_workers: Option<usize>,
    #[clap(env, long, default_value_t = 100)]
    pub spider_queue_size: usize,
    #[clap(env, long, default_value_t = 30)]
    pub spider_rate_limit_rpm: u32,
    #[clap(env, long, default_value_t = 5)]
    pub spider_min_rate_rpm: u32,
    #[clap(env, long, default_value_t = 24)]
    pub spider_cache_ttl_hours: u64,
    #[clap(env, long, default_value_t = 5)]
    pub spider_job_fetch_interval_secs: u64,
    #[clap(env, long, default_value_t = 3)]
    pub spider_cb_max_requests: u32,
    #[clap(env, long, default_value_t = 60)]
    pub spider_cb_interval_secs: u64,
    #[clap(env, long, default_value_t = 30)]
    pub spider_cb_timeout_secs: u64,
    #[clap(env, long, default_value = "https://tabelog.com")]
    pub tabelog_base_url: String,
}

#[derive(Args, Clone, Debug)]
pub struct MockMapConfig {
    #[clap(env, long, default_value_t = 8085)]
    pub mock_map_port: u16,
    #[clap(env, long)]
    pub mock_places_file: Option<String>,
    #[clap(env, long)]
    pub mock_latency_enabled: bool,
    #[clap(env, long, default_value_t = 100)]
    pub mock_latency_min_ms: u64,
    #[clap(env, long, default_value_t = 300)]
    pub mock_latency_max_ms: u64,
}

impl Config {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn socket_addr(&self, port: u16) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, port))
    }

    /// Resolves the signing secret, refusing weak or missing secrets outside development.
    pub fn jwt_secret(&self) -> anyhow::Result<String> {
        match &self.auth.jwt_secret {
            Some(secret) if secret.len() >= MIN_JWT_SECRET_LEN => Ok(secret.clone()),
            Some(_) => Err(anyhow!(
                "JWT_SECRET must be at least {} characters",
                MIN_JWT_SECRET_LEN
            )),
            None if !self.is_development() => Err(anyhow!(
                "JWT_SECRET must be set when ENVIRONMENT is {}",
                self.environment
            )),
            None => {
                warn!("JWT_SECRET not set, falling back to the development secret");
                Ok(DEV_JWT_SECRET.to_string())
            }
        }
    }
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> Option<String> {
        self.db_name.as_ref().map(|name| {
            format!(
                "host={} port={} dbname={} user={} password={}",
                self.db_host, self.db_port, name, self.db_user, self.db_password
            )
        })
    }
}

impl MapConfig {
    pub fn place_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.place_cache_ttl_secs)
    }

    /// The mock Places API is used only when it is both enabled and addressable.
    pub fn mock_base_url(&self) -> Option<&str> {
        if !self.use_mock_api {
            return None;
        }
        self.mock_api_base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

impl RestaurantConfig {
    pub fn data_freshness_ttl(&self) -> Duration {
        Duration::from_secs(self.data_freshness_ttl_secs)
    }
}

impl SpiderConfig {
    pub fn worker_count(&self) -> usize {
        self.spider_workers
            .filter(|count| *count > 0)
            .unwrap_or_else(|| (num_cpus::get() * 4).clamp(4, 20))
    }

    pub fn job_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.spider_job_fetch_interval_secs)
    }
}
