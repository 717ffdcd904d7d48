// Application state shared across handlers
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    cache::SharedKvStore,
    db::{DieselPool, RedisPool},
    services::{AuthService, LicenseService, ThrottleService, TokenService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub redis_pool: Option<RedisPool>,
    pub kv_store: SharedKvStore,
    pub auth_service: Arc<AuthService>,
    pub token_service: Arc<TokenService>,
    pub license_service: Arc<LicenseService>,
    pub throttle_service: Arc<ThrottleService>,
}
