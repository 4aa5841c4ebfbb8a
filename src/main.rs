use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use emby_balance::{
    config::Config,
    database::Database,
    repositories::{RouteRepository, StatisticsRepository},
    services::{
        HttpLinkResolver, PlaybackService, RetentionSweeper, RouteSelector, RouteService,
        ScoringService, StatisticsService,
    },
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "emby-balance")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A load-balancing proxy for Emby media servers")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = format!("emby_balance={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting emby-balance v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from specified file
    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    // Shared HTTP client with the upstream timeout bounds
    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
        .timeout(Duration::from_secs(config.upstream.read_timeout_secs))
        .build()?;

    let route_service = Arc::new(RouteService::new(RouteRepository::new(database.pool())));
    let statistics_service = Arc::new(StatisticsService::new(
        StatisticsRepository::new(database.pool()),
        config.balancer.abuse_max_requests_per_hour,
    ));
    let scoring_service = Arc::new(ScoringService::new(
        StatisticsRepository::new(database.pool()),
        &config.balancer,
    ));
    let selector = Arc::new(RouteSelector::new(
        RouteRepository::new(database.pool()),
        scoring_service.clone(),
    ));
    let link_resolver = Arc::new(HttpLinkResolver::new(http_client.clone(), &config.resolver));
    let playback_service = Arc::new(PlaybackService::new(
        http_client,
        &config.upstream,
        selector.clone(),
        link_resolver,
    ));

    // Start the retention sweeper on its schedule
    let sweeper = Arc::new(RetentionSweeper::new(
        StatisticsRepository::new(database.pool()),
        &config.retention,
    ));
    tokio::spawn({
        let sweeper = sweeper.clone();
        async move {
            if let Err(e) = sweeper.start().await {
                tracing::error!("Retention sweeper failed: {}", e);
            }
        }
    });

    let state = AppState {
        route_service,
        statistics_service,
        scoring_service,
        selector,
        playback_service,
        sweeper,
    };

    let web_server = WebServer::new(&config, state)?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}
