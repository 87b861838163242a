//! Restream relay daemon
//!
//! # Startup Flow
//!
//! 1. Install logging with a reloadable filter
//! 2. Load configuration from `RESTREAM_*` environment variables
//! 3. Load restream definitions from the config directory
//! 4. Start the ingest listener and the admin HTTP API
//! 5. Run the operator console on stdin (unless disabled)
//! 6. Wait for ctrl-c, SIGTERM or the console's `exit`, then stop every
//!    live restream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtmp_restream::console::{Console, DebugSwitch};
use rtmp_restream::definitions::DirectorySource;
use rtmp_restream::notify::WebhookNotifier;
use rtmp_restream::transport::tcp::TcpConnector;
use rtmp_restream::{api, IngestServer, Relay, RelayConfig};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "rtmp_restream=info,restreamd=info";
const DEBUG_FILTER: &str = "rtmp_restream=debug,restreamd=debug";

/// Flips the log filter between the startup filter and debug verbosity
struct LogSwitch {
    handle: reload::Handle<EnvFilter, Registry>,
    default_filter: String,
    debug: AtomicBool,
}

impl DebugSwitch for LogSwitch {
    fn toggle(&self) -> bool {
        let enable = !self.debug.load(Ordering::SeqCst);
        let directives = if enable {
            DEBUG_FILTER
        } else {
            self.default_filter.as_str()
        };

        match self.handle.reload(EnvFilter::new(directives)) {
            Ok(()) => {
                self.debug.store(enable, Ordering::SeqCst);
                enable
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload log filter");
                !enable
            }
        }
    }
}

fn init_logging() -> LogSwitch {
    let default_filter = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());

    let (filter, handle) = reload::Layer::new(EnvFilter::new(&default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    LogSwitch {
        handle,
        default_filter,
        debug: AtomicBool::new(false),
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            error!("{}", e);
            1
        }
    };
    // Skips waiting on a stdin read that can never be cancelled
    std::process::exit(code);
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let log_switch = init_logging();

    info!("Starting restream relay");

    let config = RelayConfig::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        ingest_addr = %config.ingest_addr,
        api_addr = %config.api_addr,
        config_dir = %config.config_dir.display(),
        notify = config.notify_url.is_some(),
        "Configuration loaded successfully"
    );

    let mut relay = Relay::new(
        Arc::new(DirectorySource::new(&config.config_dir)),
        Arc::new(TcpConnector::new()),
    );
    if let Some(url) = &config.notify_url {
        relay = relay.with_notifier(Arc::new(WebhookNotifier::new(url.clone())));
    }

    // A missing directory is not fatal; a later reload can pick it up
    if let Err(e) = relay.reload().await {
        warn!(error = %e, "Initial config load failed");
    }

    let shutdown = CancellationToken::new();

    let ingest_listener = TcpListener::bind(config.ingest_addr).await.map_err(|e| {
        error!(addr = %config.ingest_addr, "Failed to bind ingest listener: {}", e);
        e
    })?;
    let api_listener = TcpListener::bind(config.api_addr).await.map_err(|e| {
        error!(addr = %config.api_addr, "Failed to bind API listener: {}", e);
        e
    })?;

    let server = IngestServer::new(config.server_config(), relay.clone());
    let ingest_shutdown = shutdown.clone();
    let ingest_task = tokio::spawn(async move {
        server
            .serve_until(ingest_listener, ingest_shutdown.cancelled_owned())
            .await
    });

    info!(addr = %config.api_addr, "Admin API listening");
    let app = api::router(relay.clone());
    let api_shutdown = shutdown.clone();
    let api_task = tokio::spawn(async move {
        axum::serve(api_listener, app)
            .with_graceful_shutdown(api_shutdown.cancelled_owned())
            .await
    });

    if config.console {
        let console = Console::new(relay.clone()).with_debug_switch(Box::new(log_switch));
        let console_shutdown = shutdown.clone();
        tokio::spawn(async move {
            match console
                .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
                .await
            {
                Ok(true) => console_shutdown.cancel(),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Console stopped"),
            }
        });
    }

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = shutdown.cancelled() => info!("Exit requested from console"),
    }
    shutdown.cancel();

    relay.stop_all().await;

    ingest_task.await??;
    api_task.await??;

    info!("Restream relay shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
