use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use tally_collector::{CollectorConfig, CollectorSys, TargetConfig, system::build_sink};
use tally_http::{AppInfo, AppState, app_router};
use tally_metrics::MetricsRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tally", about = "Metrics instrumentation, scraping and forwarding")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the instrumented demo service.
    Serve(ServeArgs),
    /// Scrape targets and forward the samples to a remote write endpoint.
    Collect(CollectArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value = "8080")]
    port: u16,

    #[arg(long, default_value = "tally-demo")]
    name: String,

    #[arg(long, default_value = "development")]
    environment: String,
}

#[derive(Args)]
struct CollectArgs {
    /// JSON collector configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra target as `name=address`; may be repeated.
    #[arg(long = "target")]
    targets: Vec<String>,

    #[arg(long)]
    listen: Option<String>,

    /// Overrides both the config file and TALLY_REMOTE_WRITE_URL.
    #[arg(long)]
    remote_write_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::from_default_env().add_directive("tally=info".parse()?);
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Collect(args) => collect(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let info = AppInfo {
        name: args.name,
        environment: args.environment,
        ..AppInfo::default()
    };
    let registry = Arc::new(MetricsRegistry::new());
    let state = Arc::new(AppState::new(registry, info)?);
    let app = app_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("tally demo service listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn collect(args: CollectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => CollectorConfig::from_file(path).await?,
        None => CollectorConfig::default(),
    };
    for raw in &args.targets {
        config.targets.push(TargetConfig::parse_flag(raw)?);
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.apply_env();
    if let Some(url) = args.remote_write_url {
        config.forwarder.remote_write_url = Some(url);
    }

    let registry = Arc::new(MetricsRegistry::with_options(config.registry_options()));
    let sink = build_sink(&config.forwarder)?;
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    let collector = CollectorSys::start(&config, registry, sink)?;

    info!("tally collector listening on {}", config.listen);
    axum::serve(listener, collector.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    collector.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
