//! freshdatad - freshness monitor daemon
//!
//! Loads the data type registry, wires simulated sources and runs the
//! background monitor until Ctrl+C / SIGTERM. With `--once` it refreshes every
//! data type a single time and prints the system status as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use freshdata_common::config::{self, SourceSpec, TomlConfig};
use freshdata_common::events::FreshEvent;
use freshdata_common::DataTypeRegistry;
use freshdata_engine::sources::SimulatedSource;
use freshdata_engine::{FreshnessService, SourceDirectory, SourceParams};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for freshdatad
#[derive(Parser, Debug)]
#[command(name = "freshdatad")]
#[command(about = "Freshness cache and consistency validation monitor")]
#[command(version)]
struct Args {
    /// Config file (overrides FRESHDATA_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Monitor tick in seconds (overrides [monitor] tick_secs)
    #[arg(short, long, env = "FRESHDATA_TICK_SECS")]
    tick_secs: Option<u64>,

    /// Refresh every data type once, print status as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing before anything logs; RUST_LOG wins over the config file
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| filter_directives("info").into()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = config::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    if !from_env {
        let directives = filter_directives(&config.logging.level);
        match EnvFilter::try_new(&directives) {
            Ok(level_filter) => {
                if let Err(e) = filter_handle.reload(level_filter) {
                    warn!("Failed to apply log level from config: {}", e);
                }
            }
            Err(e) => warn!(level = %config.logging.level, "Invalid log level in config: {}", e),
        }
    }

    info!("Starting freshdatad v{}", env!("CARGO_PKG_VERSION"));

    let registry = config.registry().context("Invalid data type configuration")?;
    let sources = simulated_directory(&config, &registry);
    info!(
        data_types = registry.len(),
        sources = sources.source_count(),
        "Registry loaded"
    );

    let service = FreshnessService::from_config(&config, sources)
        .context("Failed to build freshness service")?;

    if args.once {
        for (id, outcome) in service.refresh_all(false).await {
            if let Err(e) = outcome {
                warn!(data_type = %id, "Refresh failed: {}", e);
            }
        }
        let status = service.status().await;
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(());
    }

    let tick = Duration::from_secs(args.tick_secs.unwrap_or(config.monitor.tick_secs).max(1));
    let log_task = tokio::spawn(log_events(service.events()));

    service.start_monitor(tick)?;
    shutdown_signal().await;

    if let Some(stats) = service.stop_monitor().await {
        info!(
            cycles = stats.cycles,
            refreshes = stats.refreshes,
            failures = stats.failures,
            "Monitor shut down"
        );
    }
    log_task.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Filter directives applying `level` to this binary and the workspace crates
fn filter_directives(level: &str) -> String {
    format!("freshdatad={level},freshdata_engine={level},freshdata_common={level}")
}

/// Sources from `[[sources]]`, or one simulated source per data type when none are configured
fn simulated_directory(config: &TomlConfig, registry: &DataTypeRegistry) -> SourceDirectory {
    let specs: Vec<SourceSpec> = if config.sources.is_empty() {
        registry
            .iter()
            .map(|dt| SourceSpec {
                data_type: dt.id.clone(),
                name: format!("sim-{}", dt.id),
                params: default_params(&dt.id),
            })
            .collect()
    } else {
        config.sources.clone()
    };

    let mut directory = SourceDirectory::new();
    for spec in specs {
        let fetcher = Arc::new(SimulatedSource::new(spec.name.clone()));
        directory.register(spec.data_type, spec.name, spec.params, fetcher);
    }
    directory
}

fn default_params(data_type_id: &str) -> SourceParams {
    let base = match data_type_id {
        "financial_market" => "4500",
        "stock_prices" => "150",
        "crypto_prices" => "65000",
        "news" => "Markets steady",
        "economic_indicators" => "3.2",
        _ => "100",
    };
    let mut params = SourceParams::new();
    params.insert("base".to_string(), base.to_string());
    params.insert("jitter".to_string(), "0.001".to_string());
    params.insert("providers".to_string(), "3".to_string());
    params
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<FreshEvent>) {
    loop {
        match events.recv().await {
            Ok(FreshEvent::CacheUpdated {
                data_type_id,
                value,
                confidence_score,
                ..
            }) => {
                info!(data_type = %data_type_id, %value, confidence = confidence_score, "Updated");
            }
            Ok(FreshEvent::RefreshDegraded {
                data_type_id,
                reason,
                served_tier,
                ..
            }) => {
                warn!(data_type = %data_type_id, tier = %served_tier, "Degraded: {}", reason);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event log lagging");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives_cover_workspace_crates() {
        let directives = filter_directives("debug");
        assert_eq!(
            directives,
            "freshdatad=debug,freshdata_engine=debug,freshdata_common=debug"
        );
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(EnvFilter::try_new(filter_directives("loud")).is_err());
    }
}
