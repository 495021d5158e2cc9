use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::{Settings, backends, setup};
use crate::{
    api,
    cli::telemetry,
    content::ContentRepository,
    notify::LogEmailSender,
};

const MAILER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Execute the server action.
/// # Errors
/// Returns an error if a backend cannot be reached, configuration is unusable,
/// or the server fails to start.
pub async fn execute(settings: Settings) -> Result<()> {
    log_startup_settings(&settings);

    let directory = backends::connect_directory(&settings)?;
    let store = backends::connect_store(&settings).await?;

    let (auth, dispatcher) = backends::auth_state(
        &settings,
        directory,
        Arc::clone(&store),
        Arc::new(LogEmailSender),
    )?;

    if settings.directory.is_memory() {
        // Nothing persists between runs, so bootstrap in-process.
        setup::provision(
            auth.gateway(),
            &store,
            &settings.admin_email,
            backends::admin_password(&settings),
        )
        .await
        .context("Failed to provision the in-memory backends")?;
    } else {
        backends::ensure_tables(&store).await?;
    }

    let content = ContentRepository::new(Arc::clone(&store));
    let app = api::app(auth, content, store)?;

    let listener = TcpListener::bind(format!("[::]:{}", settings.port))
        .await
        .with_context(|| format!("Failed to bind port {}", settings.port))?;

    api::serve(listener, app, shutdown_signal()).await?;

    // The router owned the last mailer handle; let queued messages drain.
    if tokio::time::timeout(MAILER_DRAIN_TIMEOUT, dispatcher)
        .await
        .is_err()
    {
        warn!("Email dispatcher did not drain before shutdown");
    }

    telemetry::shutdown_tracer();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => debug!("Received ctrl-c"),
        () = terminate => debug!("Received SIGTERM"),
    }
}

fn log_startup_settings(settings: &Settings) {
    info!(
        profile = %settings.profile,
        port = settings.port,
        directory = ?settings.directory,
        frontend_base_url = %settings.frontend_base_url,
        session_ttl_seconds = settings.session_ttl_seconds,
        "Starting backstage"
    );
    debug!(
        store_memory = matches!(settings.store, crate::store::StoreTarget::Memory),
        secret_key_set = settings.secret_key.is_some(),
        admin_email = %settings.admin_email,
        "Startup settings"
    );
}
