use actix_web::{middleware as actix_middleware, App, HttpServer};
use std::io;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use dotenvy::dotenv;
use student_api::auth::AuthService;
use student_api::config::AppConfig;
use student_api::database::{DatabaseService, InMemoryDatabase, Repository};
use student_api::middleware::{session_key, session_middleware, LoggingMiddleware, SecurityHeadersMiddleware};
use student_api::routes::{self, AppState};
use student_api::utils;

fn init_logging(config: &AppConfig) {
    // Try to initialize flexi_logger to write to the log directory; fall back to env_logger
    if let Ok(logger) = flexi_logger::Logger::try_with_str(config.logging.level.clone()) {
        let file_spec = flexi_logger::FileSpec::default()
            .directory(config.logging.directory.clone())
            .suppress_timestamp();
        if logger
            .log_to_file(file_spec)
            .duplicate_to_stdout(flexi_logger::Duplicate::Info)
            .start()
            .is_ok()
        {
            return;
        }
    }

    let log_level = utils::logging::level_from_string(&config.logging.level);
    env_logger::builder()
        .filter_level(log_level)
        .format_timestamp_secs()
        .init();
}

async fn open_repository(config: &AppConfig) -> io::Result<Arc<dyn Repository>> {
    if config.database.is_in_memory() {
        log::info!("Database: in-memory store (data is lost on restart)");
        return Ok(Arc::new(InMemoryDatabase::new()));
    }

    let db = DatabaseService::new(&config.database)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("failed to initialize database: {}", e)))?;

    if config.database.run_migrations {
        if let Err(e) = db.init_schema().await {
            log::error!("Failed to initialize DB schema: {}", e);
        } else {
            log::info!("DB schema ensured");
        }
    }

    Ok(Arc::new(db))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Load environment from .env (if present)
    let _ = dotenv();

    let mut config = AppConfig::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    init_logging(&config);

    log::info!("Starting student-api v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Server: {}:{}", config.server.host, config.server.port);
    log::info!("Workers: {}", config.server.workers);

    if config.auth.jwt_secret.is_empty() {
        log::warn!("JWT_SECRET not set, issued tokens will not survive a restart");
        config.auth.jwt_secret = utils::random_hex(32)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    }

    let repo = open_repository(&config).await?;
    let state = AppState::new(repo, AuthService::new(config.auth.clone()), config.api.clone());
    let key = session_key(&config.session);

    if let Some(seed) = &config.seed_user {
        let user = state
            .users
            .seed(seed)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("failed to seed user: {}", e)))?;
        log::info!("Seed user {} (id {}) ready", user, user.id);
    }

    log::info!(
        "Authentication classes: {:?}, throttles: {:?}",
        state.api.authentication_classes,
        state.throttles()
    );

    // Hourly housekeeping: expired blacklist rows and idle throttle history
    let users_bg = Arc::clone(&state.users);
    let throttle_bg = Arc::clone(&state.throttle_store);
    let max_window = state
        .throttles()
        .iter()
        .map(|(_, rate)| rate.duration_seconds)
        .max()
        .unwrap_or(86_400);
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match users_bg.flush_expired_tokens().await {
                Ok(0) => {}
                Ok(n) => log::info!("Flushed {} expired blacklisted tokens", n),
                Err(e) => log::error!("Failed to flush expired tokens: {}", e),
            }

            let mut store = throttle_bg.lock().await;
            store.cleanup(chrono::Utc::now().timestamp(), max_window);
            log::debug!("Throttle history tracks {} keys", store.tracked_keys());
        }
    });

    let session_config = config.session.clone();

    HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(session_middleware(&session_config, key.clone()))
            // Custom middleware (applied before compression to work with original body types)
            .wrap(SecurityHeadersMiddleware)
            .wrap(LoggingMiddleware)
            .wrap(actix_middleware::Compress::default())
            .configure(move |cfg| routes::configure(cfg, &state))
    })
    .bind((config.server.host.clone(), config.server.port))?
    .workers(config.server.workers)
    .keep_alive(std::time::Duration::from_secs(config.server.keep_alive_seconds))
    .client_request_timeout(std::time::Duration::from_secs(config.server.client_timeout_seconds))
    .client_disconnect_timeout(std::time::Duration::from_secs(config.server.client_shutdown_seconds))
    .max_connections(config.server.max_connections)
    .run()
    .await
}
