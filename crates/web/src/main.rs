use tracing::info;

use craftcloud_web::WebServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = WebServerConfig::from_env()?;

    info!(
        "Starting CraftCloud API on http://{} (panel: {}, db: {})",
        cfg.listen_addr,
        cfg.panel.base_url,
        cfg.db_path.display()
    );

    craftcloud_web::server::serve(cfg).await
}
