//! directord, the host-local IPVS director daemon.

use std::path::PathBuf;
use std::sync::Arc;

use director::engine::{Engine, EngineOptions};
use director::netmon::SystemNetworkManager;
use director::signals;
use ipvs::{CacheSettings, CachedDirector, Director, NetlinkDirector, Reconciler};
use observability::MetricsRegistry;

const DEFAULT_CONFIG_PATH: &str = "/etc/directord/config.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
    );

    // Load once up front for logging and cache wiring; the engine owns the
    // snapshot lifecycle (including reloads) from here on.
    let cfg = config::load(&config_path)?;
    config::validate(&cfg)?;

    let console = &cfg.observability.logging.console;
    let level = if console.level.is_empty() {
        "info"
    } else {
        &console.level
    };
    if cfg.observability.logging.gelf.enabled {
        common::logging::init_json(level);
    } else {
        common::logging::init(level);
    }

    tracing::info!(
        config = %config_path.display(),
        node = %cfg.node.name,
        "directord starting"
    );

    let kernel: Arc<dyn Director> = Arc::new(NetlinkDirector::new()?);
    let director: Arc<dyn Director> = Arc::new(CachedDirector::new(
        kernel,
        CacheSettings::from_daemon(&cfg.daemon.state_cache),
    ));
    let reconciler = Arc::new(Reconciler::new(director));

    let metrics = Arc::new(MetricsRegistry::new());
    let handles = signals::spawn_signal_listener()?;

    let engine = Engine::new(
        EngineOptions::new(
            config_path,
            Arc::new(SystemNetworkManager::new()),
            reconciler,
            handles.reload,
        )
        .with_metrics(metrics),
    )?;

    engine.run(handles.shutdown).await?;
    tracing::info!("directord stopped");
    Ok(())
}
