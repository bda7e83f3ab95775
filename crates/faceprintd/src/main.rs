use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.faceprint.Faceprint1";
const OBJECT_PATH: &str = "/org/faceprint/Faceprint1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "faceprintd starting");

    let config = config::Config::from_env()?;
    tracing::info!(
        identity_dir = %config.service.identity_dir.display(),
        model_dir = %config.service.model_dir.display(),
        output_dir = %config.output_dir.display(),
        "configuration loaded"
    );

    let system_bus = config.system_bus;
    let output_dir = config.output_dir;
    let engine = tokio::task::spawn_blocking(move || engine::spawn_engine(config.service))
        .await?
        .context("failed to start face engine")?;

    let service = dbus_interface::FaceprintService::new(engine, output_dir);
    let builder = if system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = if system_bus { "system" } else { "session" }, name = BUS_NAME, "faceprintd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceprintd shutting down");

    Ok(())
}
