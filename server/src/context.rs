//! Everything a session needs to serve commands, bundled once per server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::JwtVerifier;
use crate::client_manager::ClientManager;
use crate::config::{AuthMode, ServerConfig};
use crate::message_bus::MessageBus;
use crate::operation::memory::{
    MemoryAuditLog, MemoryFlightPlanStore, MemoryUserStore, StaticMetarSource,
};
use crate::operation::{AuditLogOperation, FlightPlanOperation, MetarSource, UserOperation};
use crate::subscribers::subscribe_all;

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserOperation>,
    pub flight_plans: Arc<dyn FlightPlanOperation>,
    pub audit_log: Arc<dyn AuditLogOperation>,
    pub metar: Arc<dyn MetarSource>,
}

impl Collaborators {
    /// In-process stores seeded from the configuration
    pub fn in_memory(config: &ServerConfig) -> Self {
        Self {
            users: Arc::new(MemoryUserStore::from_seed(&config.users)),
            flight_plans: Arc::new(MemoryFlightPlanStore::new()),
            audit_log: Arc::new(MemoryAuditLog::new()),
            metar: Arc::new(StaticMetarSource::new(config.weather.clone())),
        }
    }
}

pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub manager: Arc<ClientManager>,
    pub bus: Arc<MessageBus>,
    pub users: Arc<dyn UserOperation>,
    pub flight_plans: Arc<dyn FlightPlanOperation>,
    pub audit_log: Arc<dyn AuditLogOperation>,
    pub metar: Arc<dyn MetarSource>,
    pub jwt: Option<JwtVerifier>,
    session_ids: AtomicU64,
}

impl ServerContext {
    pub fn new(
        config: Arc<ServerConfig>,
        manager: Arc<ClientManager>,
        bus: Arc<MessageBus>,
        collaborators: Collaborators,
    ) -> Self {
        let jwt = match config.auth_mode {
            AuthMode::Jwt => Some(JwtVerifier::new(&config.jwt_secret)),
            AuthMode::Password => None,
        };
        Self {
            config,
            manager,
            bus,
            users: collaborators.users,
            flight_plans: collaborators.flight_plans,
            audit_log: collaborators.audit_log,
            metar: collaborators.metar,
            jwt,
            session_ids: AtomicU64::new(1),
        }
    }

    /// Creates the manager and the bus and wires the built-in subscribers.
    /// Must run inside a runtime.
    pub fn build(config: Arc<ServerConfig>, collaborators: Collaborators) -> Arc<Self> {
        let manager = Arc::new(ClientManager::new(Arc::clone(&config)));
        let bus = MessageBus::new(config.message_bus_capacity, config.shutdown_timeout());
        subscribe_all(
            &bus,
            &manager,
            &collaborators.flight_plans,
            &collaborators.audit_log,
        );
        Arc::new(Self::new(config, manager, bus, collaborators))
    }

    pub fn next_session_id(&self) -> u64 {
        self.session_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::operation::User;
    use fsd_shared::Rating;

    pub(crate) const TEST_PASSWORD: &str = "pw";

    pub(crate) struct TestStores {
        pub audit_log: Arc<MemoryAuditLog>,
        pub flight_plans: Arc<MemoryFlightPlanStore>,
    }

    /// Context over in-memory stores; every seeded user has password `pw`
    pub(crate) async fn test_context_with_stores(
        config: ServerConfig,
        users: &[(i32, Rating)],
    ) -> (Arc<ServerContext>, TestStores) {
        let user_store = Arc::new(MemoryUserStore::new());
        let hash = bcrypt::hash(TEST_PASSWORD, 4).unwrap();
        for (cid, rating) in users {
            user_store
                .insert(User {
                    cid: *cid,
                    real_name: format!("User {}", cid),
                    rating: *rating,
                    password_hash: hash.clone(),
                })
                .await;
        }

        let stores = TestStores {
            audit_log: Arc::new(MemoryAuditLog::new()),
            flight_plans: Arc::new(MemoryFlightPlanStore::new()),
        };
        let collaborators = Collaborators {
            users: user_store,
            flight_plans: stores.flight_plans.clone(),
            audit_log: stores.audit_log.clone(),
            metar: Arc::new(StaticMetarSource::new(config.weather.clone())),
        };
        (ServerContext::build(Arc::new(config), collaborators), stores)
    }

    pub(crate) async fn test_context(
        config: ServerConfig,
        users: &[(i32, Rating)],
    ) -> Arc<ServerContext> {
        test_context_with_stores(config, users).await.0
    }

    #[tokio::test]
    async fn test_jwt_mode_builds_verifier() {
        let config = ServerConfig {
            auth_mode: AuthMode::Jwt,
            jwt_secret: "secret".to_string(),
            ..ServerConfig::default()
        };
        let ctx = test_context(config, &[]).await;
        assert!(ctx.jwt.is_some());
        assert_eq!(ctx.server_name(), "SERVER");
        assert_ne!(ctx.next_session_id(), ctx.next_session_id());
    }
}
