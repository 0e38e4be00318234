//! Beholder Eye daemon.
//!
//! Connects to the hub and the cache, then runs the observer engine on the
//! main thread until Ctrl-C or a closed command channel.

mod config;

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eye_capture::{BackendFactory, ReplayBackendFactory};
use eye_ipc::EyeCommand;
use eye_transport::{HubClient, HubSink, KeyValueCache, RedisCache};

use config::EyeConfig;

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "beholder_eye=debug,eye_engine=debug,eye_capture=debug,eye_matrix=info,eye_transport=debug"
                .into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Pick the frame source: replayed images if configured, the desktop otherwise.
fn backend_factory(config: &EyeConfig) -> Result<Arc<dyn BackendFactory>> {
    if !config.replay_images.is_empty() {
        info!(images = config.replay_images.len(), "Replaying still images");
        let factory = ReplayBackendFactory::from_files(&config.replay_images)
            .context("Failed to load replay images")?;
        return Ok(Arc::new(factory));
    }

    #[cfg(windows)]
    {
        Ok(Arc::new(eye_capture::DxgiBackendFactory))
    }

    #[cfg(not(windows))]
    {
        anyhow::bail!("Desktop duplication is unavailable on this platform; set replay_images")
    }
}

/// Send `Shutdown` to the engine on Ctrl-C.
fn spawn_ctrl_c_handler(commands: Sender<EyeCommand>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create signal runtime")?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            if let Err(e) = runtime.block_on(tokio::signal::ctrl_c()) {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
            info!("Ctrl-C received, shutting down");
            let _ = commands.send(EyeCommand::Shutdown);
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    info!("Starting Beholder Eye");

    let config = EyeConfig::load().context("Failed to load configuration")?;
    info!(nexus = %config.nexus_url, redis = %config.redis_url, "Configuration loaded");

    let factory = backend_factory(&config)?;
    let cache: Arc<dyn KeyValueCache> =
        Arc::new(RedisCache::open(&config.redis_url).context("Invalid redis_url")?);

    let (command_tx, command_rx) = eye_ipc::command_channel();

    let mut hub = HubClient::new(&config.nexus_url).context("Invalid nexus_url")?;
    let handle: Arc<dyn HubSink> = Arc::new(hub.connect(command_tx.clone())?);
    spawn_ctrl_c_handler(command_tx)?;

    let mut engine =
        eye_engine::create_engine(command_rx, handle, cache, factory, config.engine_config());
    engine.run();

    info!(stats = ?engine.stats(), "Engine finished");
    drop(engine);

    hub.disconnect()?;
    info!("Beholder Eye stopped");
    Ok(())
}
