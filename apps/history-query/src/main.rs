use anyhow::Result;
use history_query::config::Config;
use history_query::http;
use history_query::service::HistoryQueryService;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,history_query=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let service = HistoryQueryService::new(
        config.db_path.clone(),
        config.max_concurrent,
        config.query_timeout,
        config.defaults.clone(),
    );
    tracing::info!(
        db_path = %config.db_path.display(),
        max_concurrent = config.max_concurrent,
        timeout_ms = config.query_timeout.as_millis() as u64,
        "history query service configured"
    );

    let app = http::router(http::HttpState { service });
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "history-query HTTP listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
