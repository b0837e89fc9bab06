//! Device agent entry point.
//!
//! Wiring: load config → init logging → connect/push loop until Ctrl-C.
//! The session engine performs no reconnects of its own; the retry loop
//! here is the policy layer on top of it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use msp_agent::{load_config, AgentConfig, Telemetry};
use msp_session::{DeviceStatus, Session, SessionError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("msp-agent.toml"));
    let config = load_config(&config_path)
        .with_context(|| format!("cannot load agent config from {}", config_path.display()))?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.agent.log_level.clone())),
        )
        .init();

    info!(
        "agent starting for device {} against {}:{}",
        config.server.device_id, config.server.address, config.server.port
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_flag.store(false, Ordering::Relaxed);
        }
    });

    let mut telemetry = Telemetry::new();
    while running.load(Ordering::Relaxed) {
        match run_session(&config, &mut telemetry, &running).await {
            Ok(()) => break,
            Err(e) => {
                error!("session ended: {e}");
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                info!(
                    "reconnecting in {:?}",
                    config.agent.reconnect_interval()
                );
                tokio::time::sleep(config.agent.reconnect_interval()).await;
            }
        }
    }

    info!("agent stopped");
    Ok(())
}

/// One connected session: device report, then push cycles until the
/// connection dies or shutdown is requested.
async fn run_session(
    config: &AgentConfig,
    telemetry: &mut Telemetry,
    running: &AtomicBool,
) -> Result<(), SessionError> {
    let session = Session::connect(config.server.clone()).await?;
    session.report_device_info(&telemetry.device_info()).await?;

    let mut interval = tokio::time::interval(config.agent.push_interval());
    let result = loop {
        interval.tick().await;
        if !running.load(Ordering::Relaxed) {
            break Ok(());
        }

        let items = telemetry.collect(&config.server.device_id);
        match session.push_data(&items).await {
            Ok(()) => info!("pushed {} values", items.len()),
            // A per-request failure leaves the session usable; anything
            // fatal ends this session and lets the caller decide.
            Err(e @ (SessionError::Timeout | SessionError::Server(_))) => {
                warn!("push failed: {e}");
            }
            Err(e) => break Err(e),
        }

        if config.agent.report_status {
            let status = DeviceStatus {
                flags: 0,
                battery_level: -1,
            };
            if let Err(e) = session.report_device_status(&status).await {
                if e.is_fatal() {
                    break Err(e);
                }
                warn!("status report failed: {e}");
            }
        }
    };

    session.disconnect().await;
    result
}
