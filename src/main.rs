use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tokengate::auth::{
    start_expiration_cleaner, CredentialHasher, InMemoryBlacklist, PgTokenStore, SessionManager,
    TokenCodec,
};
use tokengate::configuration::get_configuration;
use tokengate::identity::PgIdentityDirectory;
use tokengate::startup::run;
use tokengate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry("info");

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let codec = TokenCodec::new(&configuration.jwt).map_err(|e| {
        tracing::error!("Invalid JWT configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    let hasher = CredentialHasher::new(configuration.session.hash_cost).map_err(|e| {
        tracing::error!("Invalid hash cost: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    tracing::info!("Attempting to connect to database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
        })?;
    tracing::info!("Database ready");

    let blacklist = if configuration.session.persist_blacklist {
        let blacklist = InMemoryBlacklist::with_persistence(pool.clone());
        if let Err(e) = blacklist.restore().await {
            tracing::error!("Failed to restore blacklist: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "Blacklist restore error",
            ));
        }
        blacklist
    } else {
        tracing::warn!("Blacklist persistence disabled; revocations are lost on restart");
        InMemoryBlacklist::new()
    };

    let sessions = SessionManager::new(
        codec,
        Arc::new(PgTokenStore::new(pool.clone(), hasher)),
        Arc::new(blacklist),
        &configuration.jwt,
        configuration.session.clone(),
    );

    let _cleaner = start_expiration_cleaner(
        sessions.clone(),
        Duration::from_secs(configuration.session.cleanup_interval_seconds.max(1)),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(listener, sessions, Arc::new(PgIdentityDirectory::new(pool)))?;
    server.await
}
