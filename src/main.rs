//! CloudArb core service entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudarb::api::{create_router, AppState};
use cloudarb::arbitrage::{ArbitrageDetector, DetectorConfig, RegionClassifier};
use cloudarb::catalog::Catalog;
use cloudarb::config::Config;
use cloudarb::forecast::NoForecast;
use cloudarb::metrics;
use cloudarb::optimize::{EngineConfig, HighsSolver, OptimizationEngine, Request};
use cloudarb::pricing::{
    build_http_client, Aggregator, AggregatorConfig, AwsAdapter, AzureAdapter, GcpAdapter,
    LambdaLabsAdapter, PricingFilter, ProviderAdapter, RunPodAdapter,
};

/// Multi-cloud GPU pricing arbitrage and allocation optimizer.
#[derive(Parser, Debug)]
#[command(name = "cloudarb")]
#[command(about = "Allocates GPU workloads across cloud providers at minimum cost")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pricing/optimization service (default).
    Run {
        /// HTTP server port for health/status endpoints.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Run one aggregation cycle and print the pricing table.
    FetchPricing,

    /// Solve an optimization request from a JSON file.
    Optimize {
        /// Path to the request JSON.
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("cloudarb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    metrics::init_metrics();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::FetchPricing) => cmd_fetch_pricing().await,
        Some(Command::Optimize { request }) => cmd_optimize(request).await,
        Some(Command::Run { port }) => cmd_run(port).await,
        None => cmd_run(None).await,
    }
}

/// Load and validate configuration, then build the component graph.
struct Components {
    config: Config,
    catalog: Arc<Catalog>,
    aggregator: Arc<Aggregator>,
    detector: Arc<ArbitrageDetector>,
    engine: Arc<OptimizationEngine>,
}

fn build_components() -> anyhow::Result<Components> {
    let config = Config::load()?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let mut catalog = Catalog::builtin();
    if let Some(path) = &config.catalog_path {
        let merged = catalog.merge_from_file(std::path::Path::new(path))?;
        info!(path = %path, merged, "Catalog overlay applied");
    }
    let catalog = Arc::new(catalog);

    let http = build_http_client(config.adapter_http_timeout_ms, config.adapter_http_pool_size);
    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
        Arc::new(AwsAdapter::new(
            http.clone(),
            config.aws_pricing_url.clone(),
            Arc::clone(&catalog),
        )),
        Arc::new(AzureAdapter::new(
            http.clone(),
            config.azure_pricing_url.clone(),
            Arc::clone(&catalog),
        )),
        Arc::new(GcpAdapter::new(
            http.clone(),
            config.gcp_pricing_url.clone(),
            config.gcp_api_key.clone(),
            Arc::clone(&catalog),
        )),
        Arc::new(LambdaLabsAdapter::new(
            http.clone(),
            config.lambda_api_url.clone(),
            config.lambda_api_key.clone(),
            Arc::clone(&catalog),
        )),
        Arc::new(RunPodAdapter::new(
            http,
            config.runpod_api_url.clone(),
            config.runpod_api_key.clone(),
            Arc::clone(&catalog),
        )),
    ];

    let aggregator = Arc::new(Aggregator::new(
        adapters,
        AggregatorConfig::from_config(&config),
    )?);

    let override_pairs = config
        .region_class_overrides()
        .map_err(|e| anyhow::anyhow!(e))?;
    let regions = RegionClassifier::from_named_overrides(&override_pairs)?;

    let detector = Arc::new(ArbitrageDetector::new(
        Arc::clone(&catalog),
        regions,
        Arc::new(NoForecast),
        DetectorConfig::from_config(&config),
    ));

    let engine = Arc::new(OptimizationEngine::new(
        Arc::clone(&aggregator),
        Arc::clone(&catalog),
        Arc::new(HighsSolver::new()),
        EngineConfig::from_config(&config),
    ));

    Ok(Components {
        config,
        catalog,
        aggregator,
        detector,
        engine,
    })
}

/// Run the service: aggregation loop, detector, HTTP endpoints.
async fn cmd_run(port_override: Option<u16>) -> anyhow::Result<()> {
    let components = build_components()?;
    let config = components.config;
    let aggregator = components.aggregator;
    let detector = components.detector;
    // The engine is the surface the API layer calls into; it stays alive
    // for the lifetime of the service.
    let _engine = components.engine;

    info!(
        instances = components.catalog.len(),
        cycle_interval_secs = config.cycle_interval_secs,
        "Starting CloudArb core"
    );

    let aggregator_handle = aggregator.start().map_err(|e| anyhow::anyhow!(e))?;
    let detector_handle = Arc::clone(&detector).start(Arc::clone(&aggregator));

    // Log the opportunity stream so operators see it without a subscriber.
    let mut opportunities = detector.subscribe();
    let log_handle = tokio::spawn(async move {
        loop {
            match opportunities.recv().await {
                Ok(opp) => info!(
                    gpu_kind = %opp.gpu_kind,
                    from = %opp.from.provider,
                    to = %opp.to.provider,
                    savings_pct = %opp.savings_pct,
                    "Opportunity"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Opportunity log lagged")
                }
                Err(_) => break,
            }
        }
    });

    let port = port_override.unwrap_or(config.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(AppState::new(Arc::clone(&aggregator)));
    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    // Shutdown: stop the cycle driver first so no further generations
    // publish, then the consumers.
    info!("Shutting down");
    aggregator_handle.abort();
    detector_handle.abort();
    log_handle.abort();

    Ok(())
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Cycle interval: {}s", config.cycle_interval_secs);
    println!("  Cycle deadline: {}ms", config.cycle_deadline_ms);
    println!("  Staleness ceiling: {}s", config.staleness_ceiling_secs);
    println!("  Solver deadline: {}s", config.solver_deadline_secs);
    println!("  Solver pool size: {}", config.solver_pool_size);
    println!("  Arbitrage threshold: {}", config.arbitrage_threshold);
    println!("  Arbitrage cooldown: {}s", config.arbitrage_cooldown_secs);
    println!(
        "  GCP key: {}",
        if config.gcp_api_key.is_some() { "present" } else { "missing" }
    );
    println!(
        "  Lambda key: {}",
        if config.lambda_api_key.is_some() { "present" } else { "missing" }
    );
    println!(
        "  RunPod key: {}",
        if config.runpod_api_key.is_some() { "present" } else { "missing" }
    );
    println!("CONFIGURATION CHECK PASSED");

    Ok(())
}

/// Run one aggregation cycle and print the table.
async fn cmd_fetch_pricing() -> anyhow::Result<()> {
    let components = build_components()?;
    let aggregator = components.aggregator;

    println!("Running one aggregation cycle...");
    let summary = aggregator.run_cycle().await;
    println!(
        "Cycle: attempted={} succeeded={} merged={} dropped={} evicted={}",
        summary.attempted, summary.succeeded, summary.merged, summary.dropped, summary.evicted
    );

    let (table, generation) = aggregator.snapshot();
    println!("Generation {} ({} lines):", generation, table.len());
    for point in table.filtered(&PricingFilter::all()) {
        match point.spot {
            Some(spot) => println!(
                "  {}  on-demand ${}/hr  spot ${}/hr",
                point.line, point.on_demand, spot
            ),
            None => println!("  {}  on-demand ${}/hr", point.line, point.on_demand),
        }
    }

    for health in aggregator.adapter_health().await {
        println!(
            "  [{:?}] {} failures={}",
            health.status, health.provider, health.consecutive_failures
        );
    }

    Ok(())
}

/// Solve a request from a JSON file against freshly fetched pricing.
async fn cmd_optimize(path: PathBuf) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&path)?;
    let request: Request = serde_json::from_str(&raw)?;

    let components = build_components()?;
    let aggregator = components.aggregator;
    let engine = components.engine;

    println!("Fetching pricing...");
    aggregator.run_cycle().await;

    println!("Solving...");
    let allocation = engine.quick_optimize(request).await?;

    println!("Status: {}", allocation.status);
    println!("Total: ${}/hr", allocation.total_per_hour);
    println!("Solve: {}ms", allocation.solve_ms);
    for line in &allocation.lines {
        println!(
            "  {} x{}  (${}/hr each, ${}/hr total)",
            line.line, line.count, line.unit_price, line.total_price
        );
    }
    println!("{}", serde_json::to_string_pretty(&allocation)?);

    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
