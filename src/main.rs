//! collabd - real-time collaborative synchronization engine.

use collabd::auth::is_insecure_secret;
use collabd::config::{Config, validation};
use collabd::{Server, http, metrics};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const ALLOW_INSECURE_SECRET_ENV: &str = "COLLABD_ALLOW_INSECURE_SECRET";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(
        server = %config.server.name,
        listen = %config.listen.address,
        backend = ?config.persistence.backend,
        "Starting collabd"
    );

    // Refuse to start with a default/weak JWT secret: anyone could mint tokens.
    if is_insecure_secret(&config.auth.jwt_secret) {
        if std::env::var(ALLOW_INSECURE_SECRET_ENV).is_ok() {
            warn!("INSECURE: Running with weak jwt_secret (allowed via {ALLOW_INSECURE_SECRET_ENV})");
        } else {
            error!("FATAL: Insecure jwt_secret detected!");
            error!("  Set a random secret of at least 32 characters in config.toml:");
            error!("    [auth]");
            error!("    jwt_secret = \"<random-64-char-string>\"");
            error!("  or export COLLABD_JWT_SECRET.");
            error!("  Generate one with: openssl rand -hex 32");
            error!("  For testing only, set {ALLOW_INSECURE_SECRET_ENV}=1 to bypass this check.");
            anyhow::bail!("Refusing to start with insecure jwt_secret. See error messages above.");
        }
    }

    // Convention: http_port = 0 disables the HTTP endpoint.
    let http_port = config.server.http_port;
    if http_port == 0 {
        info!("HTTP endpoint disabled");
    } else {
        metrics::init();
        info!("Metrics initialized");

        let service = config.server.name.clone();
        tokio::spawn(async move {
            http::run_http_server(http_port, service).await;
        });
        info!(port = http_port, "HTTP server started");
    }

    let server = Server::new(config).start().await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    server.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
