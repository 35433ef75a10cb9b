mod broadcaster;
mod content_type;
mod core;
mod error;
mod http;
mod source;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use slide_proto::config::{Config, SourceConfig};
use slide_proto::platform;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::content_type::ContentTypeResolver;
use crate::core::{CoreSettings, DaemonCore, DaemonEvent};
use crate::http::HttpState;
use crate::source::Source;

/// Serve one slideshow, in sync, to every browser that opens the page.
#[derive(Parser, Debug)]
#[command(name = "slide-daemon", version)]
struct Args {
    /// Config file to use instead of the per-user one
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Show title
    #[arg(long)]
    title: Option<String>,

    /// Seconds per slide at normal speed
    #[arg(long)]
    image_duration: Option<f64>,

    /// Seconds between source refreshes
    #[arg(long)]
    refresh_interval: Option<u64>,

    /// Log everything at debug level (unless RUST_LOG is set)
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(title) = &self.title {
            config.show.title = Some(title.clone());
        }
        if let Some(secs) = self.image_duration {
            config.show.image_duration = secs;
        }
        if let Some(secs) = self.refresh_interval {
            config.show.refresh_interval = secs;
        }
    }
}

fn init_logging(debug: bool) -> anyhow::Result<PathBuf> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let default_filter = if debug {
        "debug"
    } else {
        "info,slide_daemon=debug"
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    Ok(log_path)
}

/// Ask the core to stop on Ctrl-C, SIGTERM, or when `shutdown` is cancelled
/// elsewhere (e.g. the HTTP server could not bind).
fn spawn_signal_handler(event_tx: mpsc::Sender<DaemonEvent>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => info!("Termination signal received"),
            _ = shutdown.cancelled() => {}
        }
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_path = init_logging(args.debug)?;
    info!("Log file: {:?}", log_path);

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!("Config loaded from: {:?}", config_path);
    args.apply(&mut config);
    config.validate()?;

    let host = config
        .http
        .public_host
        .clone()
        .or_else(|| platform::local_ip().map(|ip| ip.to_string()))
        .unwrap_or_else(|| config.http.bind_address.clone());
    let public_url = platform::server_url(&host, config.http.port);

    let source = Source::from_config(&config, &public_url)?;
    let resolver = ContentTypeResolver::new(source.lookup());
    if let SourceConfig::Urls { content_types, .. } = &config.source {
        for (url, content_type) in content_types {
            resolver.seed(url.clone(), Some(content_type.clone()));
        }
    }

    // Event channel: viewers, fetches and signals all funnel into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);

    let daemon_core = DaemonCore::new(
        CoreSettings::from_config(&config),
        Arc::new(source),
        Arc::new(resolver),
        event_tx.clone(),
    );

    let shutdown = CancellationToken::new();
    let app = http::router(
        HttpState {
            event_tx: event_tx.clone(),
            summary: daemon_core.summary(),
        },
        &config.http.static_folders,
        config.source.slide_folder(),
    );
    let http_handle = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        app,
        shutdown.clone(),
    );
    info!(
        "Open {} on this machine or {} on the network",
        platform::server_url("localhost", config.http.port),
        public_url
    );

    spawn_signal_handler(event_tx, shutdown.clone());

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    shutdown.cancel();
    if let Err(e) = http_handle.await {
        warn!("HTTP server task failed: {}", e);
    }
    info!("Bye");
    Ok(())
}
