//! Reporting connector entry point.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use msp_reportd::{load_config, spool, ReportdConfig};
use msp_session::codes::{field, msg};
use msp_session::{PushItem, Session, SessionError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("msp-reportd.toml"));
    let config = load_config(&config_path)
        .with_context(|| format!("cannot load config from {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.spool.log_level.clone())),
        )
        .init();

    info!(
        "reporting connector starting, spool {}",
        config.spool.directory.display()
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_flag.store(false, Ordering::Relaxed);
        }
    });

    while running.load(Ordering::Relaxed) {
        match run_session(&config, &running).await {
            Ok(()) => break,
            Err(e) => {
                error!("session ended: {e}");
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                tokio::time::sleep(config.spool.poll_interval()).await;
            }
        }
    }

    info!("reporting connector stopped");
    Ok(())
}

/// One connected session: poll the spool and upload until the connection
/// dies or shutdown is requested.
async fn run_session(config: &ReportdConfig, running: &AtomicBool) -> Result<(), SessionError> {
    let session = Session::connect(config.server.clone()).await?;

    let mut uploaded: u64 = 0;
    let mut interval = tokio::time::interval(config.spool.poll_interval());
    let result = loop {
        interval.tick().await;
        if !running.load(Ordering::Relaxed) {
            break Ok(());
        }

        let files = match spool::scan(&config.spool.directory) {
            Ok(files) => files,
            Err(e) => {
                warn!("spool scan failed: {e}");
                continue;
            }
        };

        let mut fatal = None;
        for path in files {
            match upload_report(&session, &path).await {
                Ok(()) => {
                    uploaded += 1;
                    if config.spool.delete_after_upload {
                        if let Err(e) = std::fs::remove_file(&path) {
                            warn!("cannot remove {}: {e}", path.display());
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    fatal = Some(e);
                    break;
                }
                Err(e) => warn!("upload of {} failed: {e}", path.display()),
            }
        }
        if let Some(e) = fatal {
            break Err(e);
        }

        if uploaded > 0 {
            let item = PushItem::new(
                config.server.device_id.clone(),
                "reports.uploaded",
                uploaded.to_string(),
            );
            if let Err(e) = session.push_data(&[item]).await {
                if e.is_fatal() {
                    break Err(e);
                }
                warn!("status push failed: {e}");
            }
        }
    };

    session.disconnect().await;
    result
}

/// Announces one report file, streams it in chunks under the announce
/// request id, and waits for the server's acknowledgement of the transfer.
async fn upload_report(session: &Session, path: &Path) -> Result<(), SessionError> {
    let data = std::fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("report")
        .to_string();
    let job_id = Uuid::new_v4();

    let mut announce = session.new_message(msg::REPORT_READY);
    announce.set_text(field::FILE_NAME, name.clone());
    announce.set_int64(field::FILE_SIZE, data.len() as i64);
    announce.set_text(field::JOB_ID, job_id.to_string());

    let request_id = announce.request_id();
    let handle = session.register_completion(request_id)?;
    session.send_message(&announce).await?;
    session.send_chunked(request_id, &data).await?;
    session.wait_for_completion(handle).await?;

    info!("uploaded {name} ({} bytes, job {job_id})", data.len());
    Ok(())
}
