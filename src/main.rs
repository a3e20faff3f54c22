use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lyrebird_supervisor::config::{ConfigStore, DEFAULT_ENV_PREFIX};
use lyrebird_supervisor::orchestrator::{self, OrchestratorArgs};

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Parser, Debug)]
#[command(name = "lyrebird-supervisor")]
#[command(version, about = "Unattended USB audio capture supervisor", long_about = None)]
struct CliArgs {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long, value_name = "FILE", default_value = "/etc/lyrebird/config.yaml")]
    config: PathBuf,

    /// Directory for per-device lockfiles
    #[arg(long, value_name = "DIR", default_value = "/run/lyrebird/locks")]
    lock_dir: PathBuf,

    /// Directory for per-child transcoder log files (omit to discard transcoder output)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Base RTSP URL that device output paths are appended to
    #[arg(long, value_name = "URL", default_value = "rtsp://localhost:8554")]
    rtsp_base_url: String,

    /// Override the configured recording directory
    #[arg(long, value_name = "DIR")]
    recording_dir: Option<PathBuf>,

    /// Override the configured health/metrics server bind address
    #[arg(long, value_name = "HOST:PORT")]
    health_bind_addr: Option<String>,

    /// Environment-variable override prefix
    #[arg(long, value_name = "PREFIX", default_value = DEFAULT_ENV_PREFIX)]
    env_prefix: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("starting lyrebird-supervisor v{}", env!("CARGO_PKG_VERSION"));

    if let Some(dir) = &args.log_dir {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::error!("failed to create log directory {}: {}", dir.display(), e);
            return std::process::ExitCode::from(1);
        }
    }

    // CLI overrides for recording dir / health bind address are folded into the same
    // environment-variable override mechanism the config loader already applies, rather
    // than threading a second override path through `ConfigStore`.
    if let Some(dir) = &args.recording_dir {
        std::env::set_var(format!("{}STREAM_RECORDING_DIR", args.env_prefix), dir);
    }
    if let Some(addr) = &args.health_bind_addr {
        std::env::set_var(format!("{}MONITOR_HEALTH_BIND_ADDR", args.env_prefix), addr);
    }

    let config_store = match ConfigStore::load(&args.config, &args.env_prefix) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("failed to load configuration: {}", e);
            return std::process::ExitCode::from(1);
        }
    };

    let root_cancel = CancellationToken::new();
    spawn_signal_handlers(root_cancel.clone(), config_store.clone());

    let orchestrator_args = OrchestratorArgs {
        config_store,
        lock_dir: args.lock_dir,
        log_dir: args.log_dir,
        rtsp_base_url: args.rtsp_base_url,
    };

    match orchestrator::run(orchestrator_args, root_cancel).await {
        Ok(()) => {
            tracing::info!("shutdown complete");
            std::process::ExitCode::from(0)
        }
        Err(e) if e.is_cancellation() => {
            tracing::info!("shutdown complete");
            std::process::ExitCode::from(0)
        }
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            std::process::ExitCode::from(1)
        }
    }
}

/// Wire SIGINT/SIGTERM to the root cancellation scope. On unix, SIGHUP is wired
/// separately to `ConfigStore::reload()`, which feeds the store's own reload broadcast —
/// it runs for the life of the process rather than racing the shutdown select below.
fn spawn_signal_handlers(root_cancel: CancellationToken, config_store: Arc<ConfigStore>) {
    #[cfg(unix)]
    {
        let hup_cancel = root_cancel.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
            loop {
                tokio::select! {
                    _ = sighup.recv() => {
                        tracing::info!("received SIGHUP, reloading configuration");
                        if let Err(e) = config_store.reload() {
                            tracing::warn!("config reload failed: {}", e);
                        }
                    }
                    _ = hup_cancel.cancelled() => return,
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = config_store;
    }

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("received shutdown signal");
        }

        root_cancel.cancel();
    });
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "lyrebird_supervisor=error",
        LogLevel::Warn => "lyrebird_supervisor=warn",
        LogLevel::Info => "lyrebird_supervisor=info",
        LogLevel::Debug => "lyrebird_supervisor=debug",
        LogLevel::Trace => "lyrebird_supervisor=trace",
    };

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
