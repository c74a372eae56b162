use anyhow::Context;
use dealwatch::{api, config::Config, DwarfPoolClient, NodeClient, QualityMonitor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let port = config.port;

    let node = Arc::new(
        NodeClient::new(config.node_api_url.clone()).with_max_elapsed(config.connection_timeout),
    );
    let pool = Arc::new(
        DwarfPoolClient::new(config.pool_api_url.clone())
            .with_max_elapsed(config.connection_timeout),
    );
    let monitor = Arc::new(
        QualityMonitor::new(config, node.clone(), node.clone(), node).with_pool_reports(pool),
    );

    let cancel = CancellationToken::new();
    let app = api::create_router(api::AppState::new(monitor.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Status API listening on {}", addr);

    let monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            cancel.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let cancel = cancel.clone();
            async move { cancel.cancelled().await }
        })
        .await
        .context("server error")?;

    monitor_task.await.context("quality monitor panicked")?;
    Ok(())
}
