use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use agents::orchestrator::Orchestrator;
use api_router::{api_routes, api_state::ApiState};
use axum::Router;
use common::{
    llm::{ModelGateway, OpenAiGateway},
    quota::QuotaLimiter,
    storage::{
        context::{ContextCache, CONTEXT_TURNS},
        db::{verify_corpus_dimension, SurrealDbClient},
    },
    utils::config::{get_config, AppConfig},
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Startup failure classes, mapped onto the binary's exit codes:
/// configuration errors exit 1, unreachable dependencies exit 2.
enum StartupError {
    Config(String),
    Dependency(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = match get_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(StartupError::Config(message)) => {
            error!(%message, "Configuration error");
            ExitCode::from(1)
        }
        Err(StartupError::Dependency(message)) => {
            error!(%message, "Unrecoverable dependency error");
            ExitCode::from(2)
        }
    }
}

async fn run(config: AppConfig) -> Result<(), StartupError> {
    let db = Arc::new(
        SurrealDbClient::new(
            &config.corpus_url,
            &config.corpus_username,
            &config.corpus_password,
            &config.corpus_namespace,
            &config.corpus_database,
        )
        .await
        .map_err(|e| StartupError::Dependency(format!("corpus store unreachable: {e}")))?,
    );

    db.ensure_initialized(config.embedding_dim, &config.vector_index_name)
        .await
        .map_err(|e| StartupError::Dependency(format!("index initialization failed: {e}")))?;

    // The corpus must agree with the configured embedding dimension, or the
    // vector index would silently return garbage.
    verify_corpus_dimension(&db, config.embedding_dim)
        .await
        .map_err(|e| StartupError::Config(e.to_string()))?;

    let gateway: Arc<dyn ModelGateway> = Arc::new(OpenAiGateway::from_config(&config));
    let quota = Arc::new(QuotaLimiter::new(Arc::clone(&db), &config));
    let context = Arc::new(ContextCache::new(CONTEXT_TURNS));

    let known_universities = Orchestrator::discover_universities(&db).await;
    info!(
        universities = known_universities.len(),
        embedding_dim = config.embedding_dim,
        timezone = %config.timezone,
        "Service state initialized"
    );

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        Arc::clone(&gateway),
        quota,
        Arc::clone(&context),
        &config,
        known_universities,
    ));

    let api_state = ApiState::new(db, gateway, orchestrator, context, config.clone());

    let app = Router::new()
        .merge(api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let serve_address = format!("0.0.0.0:{}", config.http_port);
    info!("Starting server listening on {serve_address}");
    let listener = tokio::net::TcpListener::bind(&serve_address)
        .await
        .map_err(|e| StartupError::Dependency(format!("cannot bind {serve_address}: {e}")))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| StartupError::Dependency(format!("server error: {e}")))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
