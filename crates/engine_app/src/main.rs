//! # engine_app
//!
//! Runs the demo world as either the authoritative server or a mirroring
//! client, selected by `ENGINE_MODE`. See [`config`] for the variables read
//! at startup.
//!
//! ```text
//! ENGINE_MODE=server cargo run -p engine_app
//! ENGINE_MODE=client ENGINE_SERVER_URL=ws://127.0.0.1:8080 cargo run -p engine_app
//! ```

mod config;
mod demo;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine_kernel::EcsManager;
use engine_net::{ClientNetworkSystem, ServerNetworkSystem};

use config::{AppConfig, Mode};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = AppConfig::from_env()?;
    info!(
        mode = %config.mode,
        wire_format = %config.net.wire_format,
        tick_rate = config.net.tick_rate,
        "engine starting"
    );

    let mut manager = match config.mode {
        Mode::Server => server(&config)?,
        Mode::Client => client(&config)?,
    };

    let frames = manager.run(shutdown_signal()).await?;
    info!(frames, "engine shut down");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();
    Ok(())
}

fn server(config: &AppConfig) -> Result<EcsManager> {
    let mut manager = EcsManager::new(config.kernel());
    manager.add_system(ServerNetworkSystem::new(config.net.clone(), demo::registry()).with_hooks(demo::Avatars))?;
    manager.add_system(demo::CounterSystem)?;
    manager.add_entity(demo::clock())?;
    info!(addr = %config.net.listen_addr(), "serving");
    Ok(manager)
}

fn client(config: &AppConfig) -> Result<EcsManager> {
    let mut manager = EcsManager::new(config.kernel());
    manager.add_system(
        ClientNetworkSystem::new(config.net.clone(), demo::registry()).with_hooks(demo::DemoClientHooks::default()),
    )?;
    manager.add_system(demo::DriftSystem::default())?;
    manager.add_system(demo::WatchSystem::default())?;
    info!(url = %config.net.server_url, "connecting");
    Ok(manager)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
