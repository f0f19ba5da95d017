//! Shared application state threaded through every axum handler.

use std::{
    sync::{atomic::AtomicU32, Arc},
    time::Instant,
};

use crate::{
    client::UpstreamClient, config::Config, health::HealthTracker, orchestrator::RequestOrchestrator,
    pool::ModelPool, router::FallbackRouter, session::SessionStore,
};

pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<ModelPool>,
    pub tracker: Arc<HealthTracker>,
    pub orchestrator: Arc<RequestOrchestrator>,
    pub sessions: Arc<SessionStore>,
    pub auth_token: String,
    pub started_at: Instant,
    /// Connected messaging-bridge transport clients (0 or 1 in practice —
    /// one bridge process per gateway instance).
    pub websocket_clients: AtomicU32,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        pool: Arc<ModelPool>,
        router: Arc<FallbackRouter>,
        client: Arc<UpstreamClient>,
        sessions: Arc<SessionStore>,
        auth_token: String,
    ) -> Self {
        let tracker = Arc::new(HealthTracker::new());
        let orchestrator = Arc::new(RequestOrchestrator::new(
            Arc::clone(&pool),
            Arc::clone(&tracker),
            router,
            client,
        ));
        Self {
            config,
            pool,
            tracker,
            orchestrator,
            sessions,
            auth_token,
            started_at: Instant::now(),
            websocket_clients: AtomicU32::new(0),
        }
    }
}
