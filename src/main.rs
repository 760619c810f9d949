// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use examd::adapters::{
    AttemptCountEnrollment, HttpGradingAdapter, HttpPlagiarismAdapter, GradingAdapter,
    ManualQueueGrading, NoopPlagiarism, PlagiarismAdapter,
};
use examd::config::Config;
use examd::engine::{IntegrityScorer, SessionEngine};
use examd::routes;
use examd::state::AppState;
use examd::store::{ExamCatalog, MemoryCatalog, MemoryStore, PgStore, SessionStore};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Session store: Postgres when configured, in-memory otherwise
    let store: Arc<dyn SessionStore> = match &config.database_url {
        Some(database_url) => {
            // Initialize Database Pool with Retry
            let mut retry_count = 0;
            let pool = loop {
                match PgPoolOptions::new()
                    .max_connections(5)
                    .acquire_timeout(Duration::from_secs(3))
                    .connect(database_url)
                    .await
                {
                    Ok(pool) => break pool,
                    Err(e) => {
                        retry_count += 1;
                        if retry_count > 5 {
                            panic!("Failed to connect to database after 5 retries: {}", e);
                        }
                        tracing::warn!(
                            "Database not ready, retrying in 2s... (Attempt {})",
                            retry_count
                        );
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            };

            tracing::info!("Database connected...");

            // Run Migrations Automatically
            tracing::info!("Running migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Migrations applied successfully.");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; sessions will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let catalog: Arc<dyn ExamCatalog> = Arc::new(MemoryCatalog::new());

    let grading: Arc<dyn GradingAdapter> = match &config.grading_endpoint {
        Some(endpoint) => Arc::new(HttpGradingAdapter::new(endpoint.clone())),
        None => Arc::new(ManualQueueGrading),
    };
    let plagiarism: Arc<dyn PlagiarismAdapter> = match &config.plagiarism_endpoint {
        Some(endpoint) => Arc::new(HttpPlagiarismAdapter::new(endpoint.clone())),
        None => Arc::new(NoopPlagiarism),
    };
    let enrollment = Arc::new(AttemptCountEnrollment::new(
        Arc::clone(&store),
        Arc::clone(&catalog),
    ));

    let engine = SessionEngine::new(
        store,
        catalog,
        enrollment,
        grading,
        plagiarism,
        IntegrityScorer::new(config.policy.clone()),
    );

    // Create AppState
    let state = AppState {
        engine,
        config: config.clone(),
    };

    // Create the Axum application router
    let app = routes::create_router(state);

    tracing::info!("examd listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listen address");

    // Start the server
    axum::serve(listener, app).await.unwrap();
}
