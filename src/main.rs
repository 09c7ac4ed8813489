//! policy-parity service entry point

use anyhow::Result;
use policy_parity::config::Settings;
use policy_parity::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting policy-parity v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    let bind_addr = settings.bind_addr.clone();

    let state = AppState::from_settings(&settings)?;
    let app = policy_parity::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
