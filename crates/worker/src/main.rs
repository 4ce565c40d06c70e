use catchup_infra::WorkerSettings;
use catchup_observability::LogFormat;

const LOG_FORMAT_VAR: &str = "CATCHUP_LOG_FORMAT";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = std::env::var(LOG_FORMAT_VAR)
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    catchup_observability::init_with(format);

    let settings = WorkerSettings::from_env();
    if settings.maintenance_mode {
        tracing::warn!("starting in maintenance mode; commands will queue until it is cleared");
    }

    let host = catchup_worker::start(&settings);

    let stop = host.handle.shutdown_token();
    tokio::spawn(catchup_worker::cancel_on_signal(tokio::signal::ctrl_c(), stop));

    host.handle.join().await?;
    tracing::info!("worker stopped");
    Ok(())
}
