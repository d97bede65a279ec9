//! Shared application dependencies wired once at startup and handed to
//! every role (web, bot, worker, simulator).

use std::sync::Arc;

use crate::core::config;
use crate::core::error::AppResult;
use crate::notify::NotificationQueue;
use crate::sim::{RouteTable, SimRegistry, TransitionTable};
use crate::storage::{create_pool, DbPool, ShipmentCache};
use crate::web::ws::ClientRegistry;

/// Everything a handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppDeps {
    pub db: Arc<DbPool>,
    pub cache: ShipmentCache,
    pub queue: NotificationQueue,
    pub clients: Arc<ClientRegistry>,
    pub sims: Arc<SimRegistry>,
    pub http: reqwest::Client,
    pub transitions: Arc<TransitionTable>,
    pub routes: Arc<RouteTable>,
}

impl AppDeps {
    /// Connects the pool and the cache, loads the tables and primes the
    /// shared route-template cache.
    pub async fn init() -> AppResult<Self> {
        let db = Arc::new(create_pool(&config::DATABASE_PATH)?);

        let cache = ShipmentCache::connect(config::REDIS_URL.as_deref()).await;
        let queue = NotificationQueue::new(cache.clone());

        let http = reqwest::Client::builder().timeout(config::network::timeout()).build()?;

        let routes = Arc::new(RouteTable::from_env_or_default());
        routes.prime_cache(&cache).await;

        Ok(Self {
            db,
            cache,
            queue,
            clients: Arc::new(ClientRegistry::new()),
            sims: Arc::new(SimRegistry::new()),
            http,
            transitions: Arc::new(TransitionTable::from_env_or_default()),
            routes,
        })
    }
}
