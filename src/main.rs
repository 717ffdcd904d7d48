// KeyGate backend entry point: configuration, pools, migrations, services,
// router, background workers.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keygate_backend::{
    app::AppState,
    app_config,
    cache::{RedisKvStore, SharedKvStore},
    db::{create_diesel_pool, mask_connection_string, RedisConfig, RedisPool},
    db::diesel_pool::DieselDatabaseConfig,
    migrations,
    services::{
        spawn_expiration_worker, AuthService, EmailService, LicenseService, SessionStore,
        ThrottleService, TokenService,
    },
    services::token::TokenServiceConfig,
    utils::set_expose_details,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Version flag for container health checks
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("keygate-backend v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keygate_backend=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    let config = app_config::config();
    set_expose_details(config.is_development());

    info!("=== STARTING KEYGATE BACKEND ===");
    info!("Environment: {}", config.environment);
    info!("Binding on {}", config.bind_address);

    // Database pool
    info!("Initializing database pool...");
    let db_config = DieselDatabaseConfig::from_app_config();
    info!("Database URL: {}", mask_connection_string(&db_config.url));

    let diesel_pool = match create_diesel_pool(db_config).await {
        Ok(pool) => {
            info!("Database connection pool initialized");
            pool
        },
        Err(e) => {
            error!("Failed to initialize database pool: {}", e);
            return Err(anyhow::anyhow!("Database initialization failed: {}", e));
        },
    };

    info!("Running embedded migrations...");
    migrations::run_migrations()
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // Redis pool + KV store
    info!("Initializing Redis pool...");
    let redis_config = RedisConfig::from_app_config();
    let redis_pool = match RedisPool::new(redis_config).await {
        Ok(pool) => {
            info!("Redis connection pool initialized");
            pool
        },
        Err(e) => {
            error!("Failed to initialize Redis pool: {}", e);
            return Err(anyhow::anyhow!("Redis initialization failed: {}", e));
        },
    };

    let kv_store: SharedKvStore = Arc::new(
        RedisKvStore::new(redis_pool.clone(), &config.redis.url)
            .map_err(|e| anyhow::anyhow!("KV store initialization failed: {}", e))?,
    );

    // Cross-node invalidations; this node keeps no local caches, so
    // observing is enough
    kv_store.subscribe_invalidations(Arc::new(|pattern| {
        debug!("cache invalidation observed: {}", pattern);
    }));

    // Services
    let session_store = SessionStore::new(kv_store.clone());
    let token_service = Arc::new(TokenService::new(
        TokenServiceConfig::from_settings(&config.jwt),
        session_store,
        Some(diesel_pool.clone()),
    ));

    let email_service = Arc::new(
        EmailService::new(&config.email)
            .map_err(|e| anyhow::anyhow!("Email service initialization failed: {}", e))?,
    );

    let auth_service = Arc::new(AuthService::new(
        diesel_pool.clone(),
        kv_store.clone(),
        token_service.clone(),
        email_service,
        config.security.clone(),
        config.cache.clone(),
    ));

    let license_service = Arc::new(LicenseService::new(
        diesel_pool.clone(),
        config.license.clone(),
    ));

    let throttle_service = Arc::new(ThrottleService::new(
        kv_store.clone(),
        config.throttle.clone(),
    ));
    if throttle_service.is_enabled() {
        info!("Throttle engine enabled (global/user/auth tiers)");
    } else {
        info!("Throttle engine DISABLED by configuration");
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        diesel_pool: diesel_pool.clone(),
        redis_pool: Some(redis_pool),
        kv_store,
        auth_service,
        token_service,
        license_service,
        throttle_service,
    };

    // Background license expiration sweeps
    spawn_expiration_worker(diesel_pool, config.license.sweep_interval_seconds);

    let app = keygate_backend::build_router(state);

    let addr: SocketAddr = config.bind_address.parse()?;
    info!("Starting HTTP server on {}...", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
