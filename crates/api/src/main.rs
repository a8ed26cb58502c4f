use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    labstore_observability::init();

    let config = labstore_api::config::ApiConfig::from_env()?;
    let bind = config.bind.clone();

    let app = labstore_api::app::build_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
