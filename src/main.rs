use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use attendify_recognition::{
    app_state::AppState,
    config::AppConfig,
    db, routes,
    services::{
        attendance::PgAttendance,
        face::FaceServiceClient,
        job_store::JobStore,
        matcher::PineconeMatcher,
        sweeper,
        worker::{Collaborators, RecognitionWorker},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing attendify-recognition server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    // Attendance ledger and rosters
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing face service client");
    let faces = FaceServiceClient::new(&config.face_service_url, config.face_encoding_dimension)
        .expect("Failed to initialize face service client");

    tracing::info!("Initializing identity index client");
    let matcher = PineconeMatcher::new(&config.pinecone_index_host, &config.pinecone_api_key)
        .expect("Failed to initialize identity index client");

    let ledger = Arc::new(PgAttendance::new(db_pool.clone()));
    let collaborators = Collaborators {
        faces: Arc::new(faces),
        matcher: Arc::new(matcher),
        attendance: ledger.clone(),
        roster: ledger,
    };

    let policy = config
        .retention_policy()
        .expect("Invalid job retention configuration");
    let store = Arc::new(JobStore::new(policy));
    let worker = RecognitionWorker::new(Arc::clone(&store), collaborators, config.worker_settings());

    let _sweeper = sweeper::spawn_sweeper(Arc::clone(&store), config.sweep_interval());

    let state = AppState::new(Some(db_pool), worker);
    let app = routes::create_app(state, prometheus_handle, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
