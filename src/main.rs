use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use serde_json::json;
use tracing::{info, warn};

use tabelogo::client::{SearchTabelogRequest, SpiderClient};
use tabelogo::config::{Cli, Command, Config, TabelogSearchArgs};
use tabelogo::controller::mock_places_controller::{self, MockPlaces};
use tabelogo::controller::{
    auth_controller, favorites_controller, map_controller, restaurant_controller, serve,
    spider_controller, ServiceSettings,
};
use tabelogo::helpers::shutdown::shutdown_signal;
use tabelogo::repositories::job_store::{InMemoryJobRepository, InMemoryResultCache};
use tabelogo::repositories::memory_repo::{
    InMemoryFavoriteRepo, InMemoryRestaurantRepo, InMemorySessionRepo, InMemoryTokenRepo,
    InMemoryUserRepo,
};
use tabelogo::repositories::place_cache::PlaceCache;
use tabelogo::repositories::postgres_repo::PostgresConnectionRepo;
use tabelogo::repositories::{
    FavoriteRepository, JobRepository, RestaurantRepository, ResultCache, TokenRepository,
    UserRepository,
};
use tabelogo::services::auth_service::AuthService;
use tabelogo::services::jwt::JwtManager;
use tabelogo::services::map_client::HttpMapClient;
use tabelogo::services::map_service::MapService;
use tabelogo::services::places_client::{HttpPlacesClient, PlacesClient};
use tabelogo::services::restaurant_service::RestaurantService;
use tabelogo::spider::circuit_breaker::CircuitBreakerConfig;
use tabelogo::spider::job_processor::{JobProcessor, JobProcessorConfig};
use tabelogo::spider::rate_limiter::DynamicRateLimiter;
use tabelogo::spider::scraper::{ScraperConfig, TabelogScraper};
use tabelogo::telemetry;

const PROCESSOR_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(&cli.config.log_level)?;

    let config = cli.config;
    match cli.command.unwrap_or(Command::All) {
        Command::Auth => run_auth(&config).await,
        Command::Map => run_map(&config).await,
        Command::Restaurant => run_restaurant(&config).await,
        Command::Spider => run_spider(&config).await,
        Command::MockMap => run_mock_map(&config).await,
        Command::All => {
            tokio::try_join!(
                run_auth(&config),
                run_map(&config),
                run_restaurant(&config),
                run_spider(&config),
                run_mock_map(&config),
            )?;
            Ok(())
        }
        Command::TabelogSearch(args) => tabelog_search(args).await,
    }
}

/// Postgres-backed when a database is configured, in-memory otherwise.
struct Stores {
    restaurants: Arc<dyn RestaurantRepository>,
    favorites: Arc<dyn FavoriteRepository>,
    users: Arc<dyn UserRepository>,
    tokens: Arc<dyn TokenRepository>,
    backend: &'static str,
}

async fn stores(config: &Config) -> anyhow::Result<Stores> {
    match config.database.connection_string() {
        Some(connection_string) => {
            let repo = PostgresConnectionRepo::connect(&connection_string, config.database.db_pool_size)
                .await?;
            repo.migrate().await?;
            info!(host = %config.database.db_host, "Connected to postgres");
            let repo = Arc::new(repo);
            Ok(Stores {
                restaurants: repo.clone(),
                favorites: repo.clone(),
                users: repo.clone(),
                tokens: repo,
                backend: "postgres",
            })
        }
        None => {
            warn!("DB_NAME not set, using in-memory repositories");
            Ok(Stores {
                restaurants: Arc::new(InMemoryRestaurantRepo::new()),
                favorites: Arc::new(InMemoryFavoriteRepo::new()),
                users: Arc::new(InMemoryUserRepo::new()),
                tokens: Arc::new(InMemoryTokenRepo::new()),
                backend: "memory",
            })
        }
    }
}

fn jwt_manager(config: &Config) -> anyhow::Result<Arc<JwtManager>> {
    let jwt = JwtManager::new(
        &config.jwt_secret()?,
        time::Duration::minutes(config.auth.jwt_access_token_expire_minutes),
        time::Duration::hours(config.auth.jwt_refresh_token_expire_hours),
    )?;
    Ok(Arc::new(jwt))
}

async fn run_auth(config: &Config) -> anyhow::Result<()> {
    let stores = stores(config).await?;
    let jwt = jwt_manager(config)?;
    let auth_service = Arc::new(AuthService::new(
        stores.users,
        Arc::new(InMemorySessionRepo::new()),
        stores.tokens,
        jwt.clone(),
    ));

    let settings = ServiceSettings::from_config("auth-service", config, Some(jwt))?
        .with_dependencies(json!({ "database": stores.backend }));
    let address = config.socket_addr(config.auth.auth_port)?;
    serve(auth_controller::router(auth_service), settings, address, shutdown_signal()).await
}

async fn run_map(config: &Config) -> anyhow::Result<()> {
    let (client, upstream) = match config.map.mock_base_url() {
        Some(base_url) => {
            info!(base_url, "Using the mock Places API");
            (HttpPlacesClient::mock(base_url)?, "mock")
        }
        None => {
            if config.map.google_maps_api_key.is_empty() {
                warn!("GOOGLE_MAPS_API_KEY is empty, Places API calls will be rejected");
            }
            let client =
                HttpPlacesClient::google(&config.map.places_base_url, &config.map.google_maps_api_key)?;
            (client, "google")
        }
    };
    let places: Arc<dyn PlacesClient> = Arc::new(client);
    let map_service = Arc::new(MapService::new(
        places,
        PlaceCache::new(config.map.place_cache_ttl()),
    ));

    let settings = ServiceSettings::from_config("map-service", config, None)?
        .with_dependencies(json!({ "places_api": upstream, "cache": "memory" }));
    let address = config.socket_addr(config.map.map_port)?;
    serve(map_controller::router(map_service), settings, address, shutdown_signal()).await
}

async fn run_restaurant(config: &Config) -> anyhow::Result<()> {
    let stores = stores(config).await?;
    let jwt = jwt_manager(config)?;
    let map_client = Arc::new(HttpMapClient::new(&config.restaurant.map_service_url)?);
    let restaurant_service = Arc::new(RestaurantService::new(
        stores.restaurants,
        stores.favorites,
        map_client,
        config.restaurant.data_freshness_ttl(),
    ));

    let routes = restaurant_controller::router(restaurant_service.clone(), jwt.clone())
        .merge(favorites_controller::router(restaurant_service, jwt.clone()));
    let settings = ServiceSettings::from_config("restaurant-service", config, Some(jwt))?
        .with_dependencies(json!({
            "database": stores.backend,
            "map_service": config.restaurant.map_service_url,
        }));
    let address = config.socket_addr(config.restaurant.restaurant_port)?;
    serve(routes, settings, address, shutdown_signal()).await
}

async fn run_spider(config: &Config) -> anyhow::Result<()> {
    let spider = &config.spider;
    let scraper = TabelogScraper::new(ScraperConfig {
        base_url: spider.tabelog_base_url.clone(),
        circuit_breaker: CircuitBreakerConfig {
            max_requests: spider.spider_cb_max_requests,
            interval: Duration::from_secs(spider.spider_cb_interval_secs),
            timeout: Duration::from_secs(spider.spider_cb_timeout_secs),
        },
        ..Default::default()
    })?;

    let jobs: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    let cache: Arc<dyn ResultCache> = Arc::new(InMemoryResultCache::new());
    let rate_limiter = Arc::new(DynamicRateLimiter::new(
        spider.spider_rate_limit_rpm,
        spider.spider_min_rate_rpm,
    ));
    let processor_config = JobProcessorConfig::from(spider);
    info!(
        workers = processor_config.workers,
        queue_size = processor_config.queue_size,
        "Starting spider job processor"
    );
    let processor = JobProcessor::new(
        jobs.clone(),
        cache.clone(),
        Arc::new(scraper),
        rate_limiter,
        processor_config,
    );
    processor.start();

    let settings = ServiceSettings::from_config("spider-service", config, None)?
        .with_dependencies(json!({ "job_store": "memory", "result_cache": "memory" }));
    let address = config.socket_addr(spider.spider_port)?;
    let served = serve(
        spider_controller::router(processor.clone(), jobs, cache),
        settings,
        address,
        shutdown_signal(),
    )
    .await;

    info!("Stopping spider job processor");
    if let Err(e) = processor.stop(PROCESSOR_STOP_TIMEOUT).await {
        warn!("Something went wrong stopping the job processor due to: {}", e);
    }
    served
}

async fn run_mock_map(config: &Config) -> anyhow::Result<()> {
    let mock = Arc::new(MockPlaces::from_config(&config.mock_map));
    info!(places = mock.len(), "Loaded mock places");

    let settings = ServiceSettings::from_config(mock_places_controller::SERVICE_NAME, config, None)?
        .with_dependencies(json!({ "places": mock.len() }));
    let address = config.socket_addr(config.mock_map.mock_map_port)?;
    serve(mock_places_controller::router(mock), settings, address, shutdown_signal()).await
}

async fn tabelog_search(args: TabelogSearchArgs) -> anyhow::Result<()> {
    let client = SpiderClient::new(
        &args.spider_service_url,
        Duration::from_secs(args.spider_client_timeout_secs),
    )?;
    let request = SearchTabelogRequest {
        google_id: args.google_id,
        area: args.area,
        place_name: args.place_name,
    };
    let response = client
        .search_tabelog(&request)
        .await
        .with_context(|| format!("Tabelog search for {} failed", request.place_name))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
