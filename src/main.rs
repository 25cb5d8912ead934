use std::{process, sync::Arc};

use page_manager::{
    application::{
        error::AppError,
        pages::{ArchivePageService, PUBLISHED_CACHE_NAME, PublishedPageService, RetryPolicy},
    },
    cache::{CacheConfig, ReadThroughCache},
    config,
    domain::entities::PublishedPageView,
    infra::{
        cache_sweeper::spawn_sweeper,
        db::PostgresRepositories,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use sqlx::PgPool;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect(&settings).await?;
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    let repositories = Arc::new(PostgresRepositories::new(pool));

    let cache_config = CacheConfig::from(&settings.cache);
    let published_cache = Arc::new(ReadThroughCache::<PublishedPageView>::new(
        PUBLISHED_CACHE_NAME,
    ));

    let archive = ArchivePageService::new(repositories.clone(), published_cache.clone())
        .with_retry(RetryPolicy::from(&settings.archive));
    let published =
        PublishedPageService::new(repositories.clone(), published_cache.clone(), cache_config);

    let state = HttpState {
        archive: Arc::new(archive),
        published: Arc::new(published),
        health: repositories,
    };

    let sweeper = spawn_sweeper(published_cache, cache_config.sweep_interval);
    let result = serve_http(&settings, state).await;

    sweeper.abort();
    let _ = sweeper.await;

    result
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let pool = connect(&settings).await?;
    info!(target = "page_manager::migrate", "applying migrations");
    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(InfraError::from)?;
    info!(target = "page_manager::migrate", "migrations applied");
    Ok(())
}

async fn connect(settings: &config::Settings) -> Result<PgPool, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "page_manager::http",
        addr = %settings.server.addr,
        "listening"
    );

    let grace = settings.server.graceful_shutdown;
    let server = async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        () = drain_deadline(grace) => {
            warn!(
                target = "page_manager::http",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    }
}

/// Resolves `grace` after a shutdown signal, bounding how long in-flight requests may drain.
async fn drain_deadline(grace: std::time::Duration) {
    shutdown_signal().await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "page_manager::http", error = %err, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target = "page_manager::http", error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!(target = "page_manager::http", "received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            info!(target = "page_manager::http", "received SIGTERM, starting graceful shutdown");
        }
    }
}
