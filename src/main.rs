use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_PORT: u16 = 8080;

/// Greeting web server.
///
/// Serves `samples_web::router()` on `0.0.0.0:$PORT` until Ctrl+C.
///
/// # Environment Variables
/// - `PORT`: listen port (default: 8080)
/// - `RUST_LOG`: log filter (default adds `samples_run=info,samples_web=info`)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("samples_run=info".parse()?)
                .add_directive("samples_web=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = port_from_env_value(std::env::var("PORT").ok())?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("App listening on port {}", port);
    tracing::info!("Press Ctrl+C to quit.");

    axum::serve(listener, samples_web::router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Parse the `PORT` value, falling back to 8080 when unset or blank.
fn port_from_env_value(value: Option<String>) -> anyhow::Result<u16> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(DEFAULT_PORT),
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PORT {raw:?}: {e}")),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
