pub mod auth;
pub mod handlers;
pub(crate) mod model_map;
pub(crate) mod relay;
pub(crate) mod request_logging;
pub(crate) mod util;

use std::sync::Arc;

use axum::Router;

use crate::checker::{KeyChecker, Scheduler};
use crate::config::Settings;
use crate::error::Result as AppResult;
use crate::proxy_dialer::ProxyDialer;
use crate::routing::LoadBalancer;
use crate::server::auth::RateLimiter;
use crate::store::Store;

pub struct AppState {
    pub config: Settings,
    pub store: Arc<Store>,
    pub balancer: LoadBalancer,
    pub rate_limiter: RateLimiter,
    pub dialer: Arc<ProxyDialer>,
    pub checker: Arc<KeyChecker>,
    pub scheduler: Arc<Scheduler>,
}

pub async fn create_app(config: Settings) -> AppResult<Router> {
    let store = Arc::new(Store::new(&config.store.database_path).await?);
    let dialer = Arc::new(ProxyDialer::new());
    let checker = Arc::new(KeyChecker::new(store.clone(), dialer.clone()));

    let settings = store.get_settings().await?;
    let scheduler = Arc::new(Scheduler::new(checker.clone(), settings.check_interval));
    scheduler.start().await;

    let app_state = Arc::new(AppState {
        config,
        store,
        balancer: LoadBalancer::new(),
        rate_limiter: RateLimiter::new(),
        dialer,
        checker,
        scheduler,
    });

    Ok(handlers::routes(app_state.clone()).with_state(app_state))
}
