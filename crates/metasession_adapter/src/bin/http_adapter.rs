#![forbid(unsafe_code)]

use std::time::Duration;

use metasession_adapter::{router, AdapterConfig, AdapterRuntime};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AdapterConfig::from_env()?;
    init_logging(config.log_json);

    let runtime = AdapterRuntime::from_config(&config)?;
    for worker_index in 0..config.worker_count {
        spawn_admission_worker(
            runtime.clone(),
            format!("admission_worker_{worker_index}"),
            config.worker_interval_ms,
        );
    }
    let app = router(runtime);

    info!(
        bind = %config.bind,
        persistence_enabled = config.persistence_enabled,
        store_path = %config.store_path.display(),
        workers = config.worker_count,
        interval_ms = config.worker_interval_ms,
        "metasession_http listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("metasession_http shutting down");
        })
        .await?;
    Ok(())
}

fn init_logging(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("metasession=info"));
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

fn spawn_admission_worker(runtime: AdapterRuntime, worker_id: String, interval_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            let runtime = runtime.clone();
            let worker = worker_id.clone();
            // The pass holds the store mutex and may fsync the journal.
            let pass_result = tokio::task::spawn_blocking(move || {
                runtime.run_admission_worker_pass(&worker, None)
            })
            .await;
            match pass_result {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    error!(worker_id = %worker_id, error = %err, "admission worker pass failed")
                }
                Err(err) => {
                    error!(worker_id = %worker_id, error = %err, "admission worker task panicked")
                }
            }
        }
    });
}
