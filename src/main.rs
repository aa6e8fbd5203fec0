mod checker;
mod config;
mod error;
mod providers;
mod proxy_dialer;
mod routing;
mod server;
mod store;

use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> crate::error::Result<()> {
    // Local development: load `.env` without panicking (no-op if missing).
    dotenvy::dotenv().ok();

    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = config::Settings::load()?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = server::create_app(config).await?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("keyhub gateway running on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
