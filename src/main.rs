//! Runs the scale bridge until Ctrl-C.
//!
//! Configuration comes from `SCALE_BRIDGE_*` environment variables; set
//! `SCALE_BRIDGE_LOG_FORMAT=json` for JSON logs.

use std::sync::Arc;

use scale_bridge::{Bridge, BridgeConfig, RecoveryCallback, list_ports, logging};

#[tokio::main]
async fn main() -> scale_bridge::Result<()> {
    if std::env::var("SCALE_BRIDGE_LOG_FORMAT").is_ok_and(|format| format == "json") {
        logging::init_json();
    } else {
        logging::init();
    }

    let config = BridgeConfig::from_env()?;

    match &config.serial.port {
        Some(port) => tracing::info!("using configured port {}", port),
        None => match list_ports() {
            Ok(ports) if ports.is_empty() => {
                tracing::warn!("no scale detected yet, will keep looking");
            }
            Ok(ports) => {
                for port in ports {
                    tracing::info!("found {} on {}", port.name, port.port);
                }
            }
            Err(e) => tracing::warn!("could not list serial ports: {}", e),
        },
    }

    let on_recovery: RecoveryCallback = Arc::new(|message: &str| tracing::info!("{}", message));
    let bridge = Bridge::serial(config, Some(on_recovery)).await?;

    tokio::signal::ctrl_c().await?;
    bridge.shutdown().await;
    Ok(())
}
