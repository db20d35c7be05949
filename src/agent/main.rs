/**
 * floorsync Agent Entry Point
 *
 * Headless sync agent: drains the local mutation queue against the factory
 * API until interrupted.
 */

#[cfg(feature = "agent")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::path::PathBuf;
    use std::sync::Arc;

    use floorsync::client::sync::spawn_reachability_probe;
    use floorsync::client::{
        Config, ConnectivityMonitor, HttpDispatcher, LocalDatabase, MutationQueue, PassOutcome,
        RetryPolicy, SessionClient, SessionCoordinator, SyncEngine, SyncService,
    };

    // Load environment variables from .env file if present
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    tracing::info!(server = %config.server_url(), "starting floorsync agent");

    let db_path = config.database_path();
    let db = LocalDatabase::open(&db_path).await?;
    tracing::info!(path = %db_path.display(), "local database opened");

    let session_client = SessionClient::new(config.clone())?;
    let session = SessionCoordinator::new(Arc::new(session_client.clone()), config.app())
        .with_persistence(db.clone());

    if !session.restore().await? {
        match (
            std::env::var("FLOORSYNC_USERNAME"),
            std::env::var("FLOORSYNC_PASSWORD"),
        ) {
            (Ok(username), Ok(password)) => match session_client.login(&username, &password).await {
                Ok(token) => session.install_token(token).await,
                Err(e) => tracing::warn!(error = %e, "login failed; continuing without a session"),
            },
            _ => tracing::warn!("no stored session and no FLOORSYNC_USERNAME/FLOORSYNC_PASSWORD"),
        }
    }

    let monitor = ConnectivityMonitor::new(false);
    let probe = spawn_reachability_probe(monitor.clone(), reqwest::Client::new(), config.clone());

    let engine = Arc::new(SyncEngine::new(
        MutationQueue::new(db.clone(), RetryPolicy::from_config(config.app())),
        session,
        Arc::new(HttpDispatcher::new(config.clone())),
        monitor,
        config.app(),
    ));
    engine.restore_state().await?;

    let mut service = SyncService::new(Arc::clone(&engine), config.app());
    let mut reports = service.subscribe_reports();
    service.start()?;

    let status = service.status().await;
    tracing::info!(
        pending = status.pending_mutations,
        quarantined = status.quarantined_mutations,
        last_sync = ?status.last_sync,
        "sync service running"
    );

    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Ok(report) => {
                    let metrics = service.metrics().await;
                    tracing::info!(
                        trigger = ?report.trigger,
                        synced = report.synced,
                        failed = report.failed,
                        quarantined = report.quarantined,
                        success_rate = metrics.success_rate(),
                        "pass report"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "pass reports dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    service.stop();
    probe.abort();

    // Final drain before exit
    if let PassOutcome::Completed(report) = engine.run_pass(floorsync::client::sync::Trigger::Manual).await? {
        tracing::info!(synced = report.synced, failed = report.failed, "final pass");
    }
    db.close().await;
    Ok(())
}

#[cfg(not(feature = "agent"))]
fn main() {
    eprintln!("The agent requires the 'agent' feature to be enabled.");
    eprintln!("Run with: cargo run --bin floorsync-agent --features agent");
    std::process::exit(1);
}
