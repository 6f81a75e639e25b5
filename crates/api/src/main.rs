use anyhow::Context;

use stockforge_infra::config::StockForgeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockforge_observability::init();

    let config = StockForgeConfig::from_env();
    let bind_addr = config.bind_addr.clone();

    let app = stockforge_api::app::build_app(config).context("failed to wire application services")?;

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
