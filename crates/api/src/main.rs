use std::net::SocketAddr;
use std::sync::Arc;

use stemflow_db::{JobStore, MemoryStore, PgStore, SubjectStore};
use stemflow_pipeline::{HttpNotifier, NotificationPort, SubjectLayout};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stemflow_api::app::{App, AppParts};
use stemflow_api::config::{PipelineConfig, ServerConfig};
use stemflow_api::stages::StageTools;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stemflow_api=debug,stemflow_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let pipeline = PipelineConfig::from_env();
    tracing::info!(
        audio_data_path = %pipeline.audio_data_path.display(),
        chain = ?pipeline.chain,
        retention = ?pipeline.retention,
        device = %pipeline.demucs_device,
        "Loaded pipeline configuration"
    );

    let (jobs, subjects): (Arc<dyn JobStore>, Arc<dyn SubjectStore>) =
        match &pipeline.database_url {
            Some(database_url) => {
                let pool = stemflow_db::create_pool(database_url)
                    .await
                    .expect("Failed to connect to database");
                stemflow_db::health_check(&pool)
                    .await
                    .expect("Database health check failed");
                stemflow_db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Using PostgreSQL job store");
                let store = Arc::new(PgStore::new(pool));
                (store.clone(), store)
            }
            None => {
                tracing::info!("DATABASE_URL not set, using in-memory job store");
                let store = Arc::new(MemoryStore::new());
                (store.clone(), store)
            }
        };

    let remote_notifier: Option<Arc<dyn NotificationPort>> =
        pipeline.relay_url.as_deref().map(|url| {
            let notifier = HttpNotifier::new(url).expect("Failed to build relay HTTP client");
            tracing::info!(url = %notifier.url(), "Sending notifications to remote relay");
            Arc::new(notifier) as Arc<dyn NotificationPort>
        });

    let app = App::start(AppParts {
        config: config.clone(),
        jobs,
        subjects,
        tools: StageTools::from_config(&pipeline),
        chain: pipeline.chain.clone(),
        retention: pipeline.retention,
        layout: SubjectLayout::new(pipeline.audio_data_path.clone()),
        default_device: pipeline.demucs_device.clone(),
        remote_notifier,
    });

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped accepting connections, cleaning up");
    app.shutdown().await;
    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
