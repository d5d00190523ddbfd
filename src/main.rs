use portfolio_storefront::{
    AppState,
    auth::seed_master,
    config::{AppConfig, Env},
    create_router,
    repository::{PostgresRepository, RepositoryState},
    storage::{LocalStorage, StorageService, StorageState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, starts logging, connects and migrates the database, seeds the
/// master account, prepares the upload root, then serves HTTP until stopped.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging
    // RUST_LOG wins; otherwise debug for this crate and request summaries from tower-http.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "portfolio_storefront=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Database migrations failed.");

    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    match seed_master(repo.as_ref(), &config).await {
        Ok(true) => {}
        Ok(false) => tracing::debug!("master account seeding skipped"),
        Err(e) => panic!("FATAL: Failed to seed master account: {e:?}"),
    }

    // 4. Upload storage
    // Also sweeps files left in the staging area by an earlier crash.
    let local_storage = LocalStorage::new(&config.upload_dir);
    local_storage
        .ensure_root()
        .await
        .expect("FATAL: Upload directory is not writable. Check UPLOAD_DIR.");
    let storage = Arc::new(local_storage) as StorageState;

    // 5. State, router, server
    let bind_addr = config.bind_addr.clone();
    let app_state = AppState {
        repo,
        storage,
        config,
    };
    let app = create_router(app_state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Failed to bind BIND_ADDR.");

    tracing::info!("Listening on {bind_addr}");
    tracing::info!("API Documentation (Swagger UI) available at: http://{bind_addr}/swagger-ui");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("FATAL: HTTP server terminated unexpectedly.");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
