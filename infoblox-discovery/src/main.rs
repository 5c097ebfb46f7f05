//! Infoblox service discovery for Prometheus.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use infoblox_discovery::collector::ClientFactory;
use infoblox_discovery::config::SourceConfig;
use infoblox_discovery::error::Result;
use infoblox_discovery::{
    Credentials, DiscoveryCache, DiscoveryCollector, DiscoveryConfig, HttpServer, InventoryClient,
    SdFileWriter, WapiClient,
};
use infoblox_discovery_common::init_tracing;

/// Prometheus service discovery for Infoblox inventory.
#[derive(Parser, Debug)]
#[command(name = "infoblox-discovery")]
#[command(about = "Publish Infoblox inventory as Prometheus service discovery targets")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, env = "INFOBLOX_DISCOVERY_CONFIG")]
    config: Option<PathBuf>,

    /// Serve /metrics and /prometheus-sd-targets instead of writing SD files.
    #[arg(long)]
    server: bool,

    /// Write SD files once and exit (file mode only).
    #[arg(long, conflicts_with = "server")]
    once: bool,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// HTTP listen host (overrides config).
    #[arg(long, env = "INFOBLOX_DISCOVERY_HOST")]
    host: Option<String>,

    /// HTTP listen port (overrides config).
    #[arg(long, env = "INFOBLOX_DISCOVERY_PORT")]
    port: Option<u16>,

    /// Cache time to live in seconds.
    #[arg(long, env = "INFOBLOX_DISCOVERY_CACHE_TTL")]
    cache_ttl: Option<u64>,

    /// Seconds between collection cycles.
    #[arg(long, env = "INFOBLOX_DISCOVERY_FETCH_INTERVAL")]
    fetch_interval: Option<u64>,

    /// Require basic authentication on the HTTP endpoints.
    #[arg(long, env = "INFOBLOX_DISCOVERY_BASIC_AUTH_ENABLED")]
    basic_auth_enabled: Option<bool>,

    /// Basic authentication user name.
    #[arg(long, env = "INFOBLOX_DISCOVERY_BASIC_AUTH_USERNAME")]
    basic_auth_username: Option<String>,

    /// Basic authentication password.
    #[arg(long, env = "INFOBLOX_DISCOVERY_BASIC_AUTH_PASSWORD", hide_env_values = true)]
    basic_auth_password: Option<String>,

    /// Directory SD files are written to.
    #[arg(long, env = "INFOBLOX_DISCOVERY_PROMETHEUS_SD_FILE_DIRECTORY")]
    sd_file_directory: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "INFOBLOX_DISCOVERY_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DiscoveryConfig::read_file(path)?,
        None => DiscoveryConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    init_tracing(&config.logging)?;

    info!(sources = config.sources.len(), "Starting Infoblox discovery");
    if config.sources.is_empty() {
        warn!("No sources configured");
    }

    let cache = Arc::new(DiscoveryCache::new(Duration::from_secs(
        config.cache.ttl_secs,
    )));

    let factory: ClientFactory = Arc::new(
        |source: &SourceConfig| -> Result<Arc<dyn InventoryClient>> {
            let client = WapiClient::new(source)?;
            debug!(source = %source.name, url = client.base_url(), "WAPI client created");
            Ok(Arc::new(client) as Arc<dyn InventoryClient>)
        },
    );

    let mut collector = DiscoveryCollector::new(
        cache.clone(),
        Duration::from_secs(config.schedule.fetch_interval_secs),
    );
    collector.load_sources(&config.sources, &factory);

    // Sources are re-read from the file before every cycle.
    if let Some(path) = &args.config {
        collector = collector.with_config_reload(path, factory);
    }

    if args.server {
        run_server(&config, collector).await
    } else {
        run_file_mode(&config, collector, args.once).await
    }
}

/// Apply command line and environment overrides to the file configuration.
fn apply_overrides(config: &mut DiscoveryConfig, args: &Args) {
    if let Some(listen) = &args.listen {
        config.http.listen = listen.clone();
    }
    if args.host.is_some() || args.port.is_some() {
        let (host, port) = config
            .http
            .listen
            .rsplit_once(':')
            .map(|(h, p)| (h.to_string(), p.to_string()))
            .unwrap_or_else(|| ("0.0.0.0".to_string(), "9694".to_string()));
        let host = args.host.clone().unwrap_or(host);
        let port = args.port.map(|p| p.to_string()).unwrap_or(port);
        config.http.listen = format!("{}:{}", host, port);
    }
    if let Some(ttl) = args.cache_ttl {
        config.cache.ttl_secs = ttl;
    }
    if let Some(interval) = args.fetch_interval {
        config.schedule.fetch_interval_secs = interval;
    }

    let auth = &mut config.http.basic_auth;
    if let Some(enabled) = args.basic_auth_enabled {
        auth.enabled = enabled;
    }
    if let Some(username) = &args.basic_auth_username {
        auth.username = username.clone();
    }
    if let Some(password) = &args.basic_auth_password {
        auth.password = password.clone();
    }

    if let Some(directory) = &args.sd_file_directory {
        config.file_sd.directory = Some(directory.clone());
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

/// Collect periodically and serve metrics and HTTP service discovery.
async fn run_server(config: &DiscoveryConfig, mut collector: DiscoveryCollector) -> anyhow::Result<()> {
    let listen_addr: SocketAddr = config
        .http
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = HttpServer::new(
        collector.cache().clone(),
        listen_addr,
        Credentials::from_config(&config.http.basic_auth),
    );

    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let collector_task = tokio::spawn(async move {
        collector.run(shutdown_rx, |_| {}).await;
    });

    wait_for_signal().await;
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_task.await;
        let _ = collector_task.await;
    })
    .await;

    info!("Infoblox discovery stopped");
    Ok(())
}

/// Collect and write SD files, once or periodically.
async fn run_file_mode(
    config: &DiscoveryConfig,
    mut collector: DiscoveryCollector,
    once: bool,
) -> anyhow::Result<()> {
    let directory = config.validate_file_sd()?;
    let writer = SdFileWriter::new(directory)?;

    let write = move |cache: &DiscoveryCache| {
        if let Err(e) = writer.write_all(cache) {
            error!(error = %e, "Failed to write service discovery files");
        }
    };

    if once {
        collector.run_cycle().await;
        write(collector.cache().as_ref());
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_task = tokio::spawn(async move {
        collector.run(shutdown_rx, write).await;
    });

    wait_for_signal().await;
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), collector_task).await;

    info!("Infoblox discovery stopped");
    Ok(())
}

async fn wait_for_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Cannot listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
