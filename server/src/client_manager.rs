//! Registry of logged-in clients and the broadcast fan-out.
//!
//! The manager owns every [`Client`] and indexes it by callsign and by cid.
//! Registration, lookup and removal are linearizable under one registry lock;
//! the lock is never held while a line is being queued to a client.
//!
//! Broadcasts snapshot the registry, filter the recipients and queue the line
//! on a bounded pool of tasks. A recipient that cannot keep up is dropped by
//! its own outbound queue rather than slowing the sender down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fsd_shared::codec::ensure_terminated;
use fsd_shared::command::{FsdPacket, RemoveClient};
use fsd_shared::ProtocolError;
use log::{debug, info, warn};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;

use crate::cache::CachedValue;
use crate::client::Client;
use crate::config::ServerConfig;
use crate::error::{ManagerError, ServerError};
use crate::filter::BroadcastFilter;
use crate::shutdown::Release;
use crate::whazzup::Whazzup;

/// Idle recipient vectors kept for reuse by broadcasts
const POOLED_VECTORS: usize = 8;

#[derive(Default)]
struct Registry {
    by_callsign: HashMap<String, Arc<Client>>,
    by_cid: HashMap<i32, Vec<Arc<Client>>>,
}

impl Registry {
    fn insert(&mut self, client: Arc<Client>) {
        self.by_cid
            .entry(client.cid())
            .or_default()
            .push(Arc::clone(&client));
        self.by_callsign.insert(client.callsign().to_string(), client);
    }

    fn remove(&mut self, callsign: &str) -> Option<Arc<Client>> {
        let client = self.by_callsign.remove(callsign)?;
        if let Some(clients) = self.by_cid.get_mut(&client.cid()) {
            clients.retain(|c| !Arc::ptr_eq(c, &client));
            if clients.is_empty() {
                self.by_cid.remove(&client.cid());
            }
        }
        Some(client)
    }

    /// Removes `client` only if it is still the entry for its callsign
    fn remove_exact(&mut self, client: &Arc<Client>) -> bool {
        match self.by_callsign.get(client.callsign()) {
            Some(current) if Arc::ptr_eq(current, client) => {
                self.remove(client.callsign());
                true
            }
            _ => false,
        }
    }

    fn clear(&mut self) {
        self.by_callsign.clear();
        self.by_cid.clear();
    }
}

pub struct ClientManager {
    config: Arc<ServerConfig>,
    registry: RwLock<Registry>,
    shutting_down: AtomicBool,
    broadcast_permits: Arc<Semaphore>,
    recipient_pool: Mutex<Vec<Vec<Arc<Client>>>>,
    whazzup: CachedValue<Arc<Whazzup>>,
}

impl ClientManager {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            broadcast_permits: Arc::new(Semaphore::new(config.broadcast_pool_size)),
            whazzup: CachedValue::new(config.whazzup_ttl()),
            registry: RwLock::new(Registry::default()),
            shutting_down: AtomicBool::new(false),
            recipient_pool: Mutex::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Registers a freshly logged-in client.
    ///
    /// The callsign check and the insert happen under the same write lock,
    /// so of two concurrent logins with one callsign exactly one succeeds.
    pub async fn add_client(&self, client: Arc<Client>) -> Result<(), ManagerError> {
        if self.is_shutting_down() {
            return Err(ManagerError::ShuttingDown);
        }

        let mut registry = self.registry.write().await;
        if registry.by_callsign.contains_key(client.callsign()) {
            return Err(ManagerError::CallsignInUse(client.callsign().to_string()));
        }
        if registry.by_callsign.len() >= self.config.max_clients {
            return Err(ManagerError::ServerFull);
        }

        info!(
            "Client {} (cid {}) registered, {} online",
            client.callsign(),
            client.cid(),
            registry.by_callsign.len() + 1
        );
        registry.insert(client);
        Ok(())
    }

    pub async fn get_client(&self, callsign: &str) -> Option<Arc<Client>> {
        self.registry.read().await.by_callsign.get(callsign).cloned()
    }

    pub async fn get_clients_by_cid(&self, cid: i32) -> Result<Vec<Arc<Client>>, ManagerError> {
        self.registry
            .read()
            .await
            .by_cid
            .get(&cid)
            .cloned()
            .ok_or(ManagerError::CidNotFound(cid))
    }

    pub async fn delete_client(&self, callsign: &str) -> Result<Arc<Client>, ManagerError> {
        self.registry
            .write()
            .await
            .remove(callsign)
            .ok_or_else(|| ManagerError::CallsignNotFound(callsign.to_string()))
    }

    /// True while `client` is the registered entry for its callsign
    pub async fn is_registered(&self, client: &Arc<Client>) -> bool {
        matches!(
            self.registry.read().await.by_callsign.get(client.callsign()),
            Some(current) if Arc::ptr_eq(current, client)
        )
    }

    pub async fn len(&self) -> usize {
        self.registry.read().await.by_callsign.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<Arc<Client>> {
        self.registry
            .read()
            .await
            .by_callsign
            .values()
            .cloned()
            .collect()
    }

    pub async fn send_message_to(&self, callsign: &str, line: &str) -> Result<(), ManagerError> {
        let client = self
            .get_client(callsign)
            .await
            .ok_or_else(|| ManagerError::CallsignNotFound(callsign.to_string()))?;
        client.send_line(&ensure_terminated(line))
    }

    fn take_recipients(&self) -> Vec<Arc<Client>> {
        self.recipient_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    fn return_recipients(&self, mut recipients: Vec<Arc<Client>>) {
        recipients.clear();
        let mut pool = self.recipient_pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < POOLED_VECTORS {
            pool.push(recipients);
        }
    }

    /// Queues `line` to every registered client accepted by `filter`.
    ///
    /// The origin never receives its own broadcast and disconnected clients
    /// are skipped. Returns the number of recipients the line was queued to.
    pub async fn broadcast(
        &self,
        line: &str,
        origin: Option<&Arc<Client>>,
        filter: &BroadcastFilter,
    ) -> usize {
        let mut recipients = self.take_recipients();
        recipients.extend(self.registry.read().await.by_callsign.values().cloned());

        let line: Arc<str> = Arc::from(ensure_terminated(line).as_ref());
        let mut sends = JoinSet::new();

        for recipient in recipients.drain(..) {
            if origin.is_some_and(|o| Arc::ptr_eq(o, &recipient)) || recipient.is_disconnected() {
                continue;
            }
            if !filter.matches(&recipient, origin.map(|o| o.as_ref())) {
                continue;
            }

            let permit = match Arc::clone(&self.broadcast_permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let line = Arc::clone(&line);
            sends.spawn(async move {
                let queued = recipient.send_line_without_log(line).is_ok();
                drop(permit);
                queued
            });
        }
        self.return_recipients(recipients);

        let mut delivered = 0;
        while let Some(result) = sends.join_next().await {
            if matches!(result, Ok(true)) {
                delivered += 1;
            }
        }
        debug!("Broadcast {} to {} clients", line.trim_end(), delivered);
        delivered
    }

    async fn announce_removal(&self, client: &Arc<Client>) {
        let line = RemoveClient::new(client.is_atc(), client.callsign()).to_line();
        self.broadcast(&line, Some(client), &BroadcastFilter::All).await;
    }

    /// Drops a logged-in client after it logged off or was removed.
    /// Returns false when the client was no longer registered.
    pub async fn remove_client(&self, client: &Arc<Client>) -> bool {
        let removed = self.registry.write().await.remove_exact(client);
        if removed {
            info!("Client {} (cid {}) removed", client.callsign(), client.cid());
            self.announce_removal(client).await;
        }
        removed
    }

    /// Tells the client why it is being removed, closes its session and
    /// removes it from the registry. Does not wait for the socket to close.
    pub async fn kick_client_from_server(
        &self,
        callsign: &str,
        reason: &str,
    ) -> Result<Arc<Client>, ManagerError> {
        let client = self
            .get_client(callsign)
            .await
            .ok_or_else(|| ManagerError::CallsignNotFound(callsign.to_string()))?;

        let error = ProtocolError::custom(
            true,
            callsign,
            format!("you were kicked from the server, reason is {}", reason),
        );
        if let Err(e) = client.send_line(&error.to_line(&self.config.server_name, callsign)) {
            debug!("Kick notice to {} not queued: {}", callsign, e);
        }
        client.close();

        info!("Kicked {} from the server: {}", callsign, reason);
        self.remove_client(&client).await;
        Ok(client)
    }

    /// Called by a session whose socket went away without a logoff.
    ///
    /// The client stays registered but disconnected for the reconnect
    /// window; a login with the same callsign and cid inside the window
    /// rebinds it. Once the window passes it is removed, unless the lost
    /// session was replaced meanwhile.
    pub async fn on_connection_lost(self: &Arc<Self>, client: Arc<Client>, session_id: u64) {
        if client.session_id() != session_id || !self.is_registered(&client).await {
            return;
        }
        client.mark_disconnected();

        let window = self.config.reconnect_window();
        if self.is_shutting_down() || window.is_zero() {
            if client.retire(session_id) {
                self.remove_client(&client).await;
            }
            return;
        }

        info!(
            "Client {} lost its connection, holding it for {:?}",
            client.callsign(),
            window
        );
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            manager.expire_lost_session(client, session_id).await;
        });
    }

    async fn expire_lost_session(&self, client: Arc<Client>, session_id: u64) {
        if !client.retire(session_id) {
            debug!("Client {} reconnected in time", client.callsign());
            return;
        }
        if self.remove_client(&client).await {
            info!("Reconnect window of {} expired", client.callsign());
        }
    }

    /// Closes every session and empties the registry.
    ///
    /// Only the first call does any work; later calls return at once.
    pub async fn shutdown(&self) -> Result<(), ManagerError> {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let clients = self.snapshot().await;
        info!("Disconnecting {} clients", clients.len());

        let mut closing = JoinSet::new();
        for client in clients {
            let permits = Arc::clone(&self.broadcast_permits);
            closing.spawn(async move {
                let _permit = permits.acquire_owned().await;
                if let Some(closed) = client.close() {
                    closed.cancelled().await;
                }
            });
        }

        let timeout = self.config.shutdown_timeout();
        let drained = tokio::time::timeout(timeout, async {
            while closing.join_next().await.is_some() {}
        })
        .await;

        self.registry.write().await.clear();

        match drained {
            Ok(()) => {
                info!("All clients disconnected");
                Ok(())
            }
            Err(_) => {
                warn!("Clients still closing after {:?}", timeout);
                Err(ManagerError::ShutdownTimeout)
            }
        }
    }

    pub fn whazzup_ttl(&self) -> Duration {
        self.whazzup.ttl()
    }

    /// The online snapshot, regenerated at most once per TTL
    pub async fn whazzup(&self) -> Arc<Whazzup> {
        let manager = self;
        self.whazzup
            .get_value(move || async move { Arc::new(Whazzup::build(&manager.snapshot().await)) })
            .await
    }
}

#[async_trait]
impl Release for ClientManager {
    fn name(&self) -> &str {
        "client manager"
    }

    async fn release(&self) -> Result<(), ServerError> {
        self.shutdown().await.map_err(ServerError::from)
    }
}
