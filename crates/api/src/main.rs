use std::sync::Arc;

use anyhow::Context;

use stockflow_api::app::{build_app, services::build_services};
use stockflow_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockflow_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let services = build_services(&config)
        .await
        .context("failed to initialize stores")?;

    let app = build_app(Arc::new(services));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
