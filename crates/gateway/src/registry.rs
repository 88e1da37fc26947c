//! Connection registry: every live realtime connection and who should get what.
//!
//! Three sharded indexes (by registration, by user, by chat) plus a
//! participant directory that mirrors chat membership for users that are
//! online. No operation awaits, so the registry is safe to call from
//! synchronous publish paths.
//!
//! Lock order: a `by_user` entry may be held while touching the other maps,
//! never the reverse.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type RegistrationId = Uuid;

/// Serialized event frame shared by every recipient of a publish.
pub type OutboundFrame = Arc<str>;

/// Which events a connection receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChatScope {
    /// Only the named chat.
    Chat(String),
    /// Every chat the user participates in.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    SlowConsumer,
    Removed,
    Idle,
    Shutdown,
    TransportError,
}

impl CloseReason {
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::ClientClosed => 1000,
            CloseReason::Shutdown => 1001,
            CloseReason::TransportError => 1011,
            CloseReason::Idle => 4000,
            CloseReason::Removed => 4003,
            CloseReason::SlowConsumer => 4009,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::Removed => "removed",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
            CloseReason::TransportError => "transport_error",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("user {user_id} already has {limit} open connections")]
    CapacityExceeded { user_id: String, limit: usize },
    #[error("not a participant of chat {chat_id}")]
    InvalidScope { chat_id: String },
}

impl RegistryError {
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::CapacityExceeded { .. } => "capacity_exceeded",
            RegistryError::InvalidScope { .. } => "invalid_scope",
        }
    }

    pub fn close_code(&self) -> u16 {
        match self {
            RegistryError::CapacityExceeded { .. } => 4008,
            RegistryError::InvalidScope { .. } => 4003,
        }
    }
}

/// A live connection as the registry sees it.
pub struct ConnectionHandle {
    pub registration_id: RegistrationId,
    pub user_id: String,
    pub scope: ChatScope,
    sender: mpsc::Sender<OutboundFrame>,
    close: watch::Sender<Option<CloseReason>>,
    created: Instant,
    last_seen_ms: AtomicU64,
}

impl ConnectionHandle {
    /// Build a handle around the sending half of the connection's outbound queue.
    /// The returned receiver fires when the connection should shut down.
    pub fn new(
        user_id: impl Into<String>,
        scope: ChatScope,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> (Self, watch::Receiver<Option<CloseReason>>) {
        let (close, close_rx) = watch::channel(None);
        let handle = Self {
            registration_id: Uuid::new_v4(),
            user_id: user_id.into(),
            scope,
            sender,
            close,
            created: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        };
        (handle, close_rx)
    }

    pub fn try_send(&self, frame: OutboundFrame) -> Result<(), mpsc::error::TrySendError<OutboundFrame>> {
        self.sender.try_send(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.close.borrow().is_some()
    }

    pub fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last_seen)
    }

    /// Ask the session to shut down. Only the first reason sticks.
    pub fn close(&self, reason: CloseReason) {
        self.close.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close.borrow()
    }

    fn receives(&self, chat_id: &str) -> bool {
        match &self.scope {
            ChatScope::Global => true,
            ChatScope::Chat(scoped) => scoped == chat_id,
        }
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("registration_id", &self.registration_id)
            .field("user_id", &self.user_id)
            .field("scope", &self.scope)
            .finish()
    }
}

pub struct ConnectionRegistry {
    connections: DashMap<RegistrationId, Arc<ConnectionHandle>>,
    by_user: DashMap<String, HashSet<RegistrationId>>,
    by_chat: DashMap<String, HashSet<RegistrationId>>,
    participants: DashMap<String, HashSet<String>>,
    /// Bumped before every membership change applied to the directory.
    membership_epoch: AtomicU64,
    max_connections_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections_per_user: usize) -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            by_chat: DashMap::new(),
            participants: DashMap::new(),
            membership_epoch: AtomicU64::new(0),
            max_connections_per_user: max_connections_per_user.max(1),
        }
    }

    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Result<RegistrationId, RegistryError> {
        self.register_with_chats(handle, &[])
    }

    /// Register a connection and record the chats the store lists for its
    /// user. Both happen under the user's index entry, so a concurrent
    /// disconnect of the user's last other connection cannot prune them.
    pub fn register_with_chats(
        &self,
        handle: Arc<ConnectionHandle>,
        chats: &[String],
    ) -> Result<RegistrationId, RegistryError> {
        let id = handle.registration_id;
        let user_id = handle.user_id.as_str();

        {
            let mut ids = self.by_user.entry(user_id.to_string()).or_default();
            if ids.len() >= self.max_connections_per_user {
                let limit = self.max_connections_per_user;
                drop(ids);
                warn!(%user_id, limit, "connection limit reached");
                return Err(RegistryError::CapacityExceeded {
                    user_id: user_id.to_string(),
                    limit,
                });
            }

            if let ChatScope::Chat(chat_id) = &handle.scope {
                if !chats.contains(chat_id) && !self.is_participant(chat_id, user_id) {
                    drop(ids);
                    self.by_user.remove_if(user_id, |_, ids| ids.is_empty());
                    warn!(%chat_id, %user_id, "rejected connection outside membership");
                    return Err(RegistryError::InvalidScope {
                        chat_id: chat_id.clone(),
                    });
                }
            }

            for chat_id in chats {
                self.participants
                    .entry(chat_id.clone())
                    .or_default()
                    .insert(user_id.to_string());
            }

            ids.insert(id);
            handle.touch();
            self.connections.insert(id, handle.clone());
            if let ChatScope::Chat(chat_id) = &handle.scope {
                self.by_chat.entry(chat_id.clone()).or_default().insert(id);
            }
        }

        // A removal that ran between the scope check and the `by_chat` insert
        // missed this handle; it must not stay registered.
        if let ChatScope::Chat(chat_id) = &handle.scope {
            if !self.is_participant(chat_id, user_id) {
                self.unregister(id);
                warn!(%chat_id, %user_id, "membership revoked while connecting");
                return Err(RegistryError::InvalidScope {
                    chat_id: chat_id.clone(),
                });
            }
        }

        info!(registration_id = %id, %user_id, scope = ?handle.scope, "connection registered");
        Ok(id)
    }

    /// Remove a registration. Returns the handle if it was still registered.
    pub fn unregister(&self, id: RegistrationId) -> Option<Arc<ConnectionHandle>> {
        // Dropping from `connections` first hides the handle from snapshots.
        let (_, handle) = self.connections.remove(&id)?;

        if let Entry::Occupied(mut ids) = self.by_user.entry(handle.user_id.clone()) {
            ids.get_mut().remove(&id);
            if ids.get().is_empty() {
                self.forget_user(&handle.user_id);
                ids.remove();
            }
        }
        if let ChatScope::Chat(chat_id) = &handle.scope {
            remove_from_index(&self.by_chat, chat_id, id);
        }

        debug!(registration_id = %id, user_id = %handle.user_id, "connection unregistered");
        Some(handle)
    }

    /// Drop an offline user from the directory.
    fn forget_user(&self, user_id: &str) {
        self.participants.retain(|_, users| {
            users.remove(user_id);
            !users.is_empty()
        });
        debug!(user_id, "pruned participant directory");
    }

    /// Unregister and tell the session to close.
    pub fn evict(&self, id: RegistrationId, reason: CloseReason) -> bool {
        match self.unregister(id) {
            Some(handle) => {
                warn!(registration_id = %id, user_id = %handle.user_id, reason = reason.as_str(), "connection evicted");
                handle.close(reason);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: RegistrationId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Point-in-time set of connections that should receive events for `chat_id`.
    pub fn handles_for(&self, chat_id: &str) -> Vec<Arc<ConnectionHandle>> {
        let mut candidates: HashSet<RegistrationId> = self
            .by_chat
            .get(chat_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let users: Vec<String> = self
            .participants
            .get(chat_id)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default();

        for user_id in users {
            if let Some(ids) = self.by_user.get(&user_id) {
                candidates.extend(ids.iter().copied());
            }
        }

        candidates
            .into_iter()
            .filter_map(|id| self.get(id))
            .filter(|handle| handle.receives(chat_id) && !handle.is_closed())
            .collect()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .is_some_and(|ids| ids.iter().any(|id| self.connections.contains_key(id)))
    }

    pub fn touch(&self, id: RegistrationId) {
        if let Some(handle) = self.connections.get(&id) {
            handle.touch();
        }
    }

    pub fn idle_for(&self, id: RegistrationId) -> Option<Duration> {
        self.connections.get(&id).map(|handle| handle.idle_for())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_participant(&self, chat_id: &str, user_id: &str) -> bool {
        self.participants
            .get(chat_id)
            .is_some_and(|users| users.contains(user_id))
    }

    /// Changes whenever a membership change reaches the directory. Sessions
    /// compare it across a store read to detect changes they raced with.
    pub fn membership_epoch(&self) -> u64 {
        self.membership_epoch.load(Ordering::SeqCst)
    }

    fn bump_membership_epoch(&self) {
        self.membership_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Chats the directory lists `user_id` in.
    pub fn chats_for_user(&self, user_id: &str) -> Vec<String> {
        self.participants
            .iter()
            .filter(|entry| entry.value().contains(user_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Replace the known membership of a chat.
    pub fn sync_participants<I>(&self, chat_id: &str, users: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.bump_membership_epoch();
        self.participants
            .insert(chat_id.to_string(), users.into_iter().collect());
    }

    /// Record a new membership. Offline users are skipped; they are loaded
    /// from the store when they connect.
    pub fn add_participant(&self, chat_id: &str, user_id: &str) {
        self.bump_membership_epoch();
        if let Some(_online) = self.by_user.get(user_id) {
            self.participants
                .entry(chat_id.to_string())
                .or_default()
                .insert(user_id.to_string());
        }
    }

    /// Forget a membership and evict the user's connections scoped to that chat.
    pub fn remove_participant(&self, chat_id: &str, user_id: &str) -> usize {
        self.bump_membership_epoch();
        self.drop_membership(chat_id, user_id)
    }

    /// Align a user's directory entries with the chats the store lists for
    /// them. Entries the store no longer has are removed, closing scoped
    /// connections to those chats.
    pub fn reconcile_user(&self, user_id: &str, chats: &[String]) -> usize {
        let Some(online) = self.by_user.get(user_id) else {
            return 0;
        };
        for chat_id in chats {
            self.participants
                .entry(chat_id.clone())
                .or_default()
                .insert(user_id.to_string());
        }
        drop(online);

        self.chats_for_user(user_id)
            .into_iter()
            .filter(|chat_id| !chats.contains(chat_id))
            .map(|chat_id| {
                debug!(%chat_id, user_id, "dropping stale directory entry");
                self.drop_membership(&chat_id, user_id)
            })
            .sum()
    }

    fn drop_membership(&self, chat_id: &str, user_id: &str) -> usize {
        remove_from_index(&self.participants, chat_id, user_id.to_string());

        let scoped: Vec<RegistrationId> = self
            .by_chat
            .get(chat_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        scoped
            .into_iter()
            .filter(|id| self.get(*id).is_some_and(|handle| handle.user_id == user_id))
            .filter(|id| self.evict(*id, CloseReason::Removed))
            .count()
    }

    /// Drop a closed chat and every connection scoped to it.
    pub fn close_chat(&self, chat_id: &str) -> usize {
        self.bump_membership_epoch();
        self.participants.remove(chat_id);
        let scoped: Vec<RegistrationId> = self
            .by_chat
            .get(chat_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        scoped
            .into_iter()
            .filter(|id| self.evict(*id, CloseReason::Removed))
            .count()
    }

    /// Evict connections that have been silent for longer than `timeout`.
    pub fn sweep_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<RegistrationId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for() > timeout)
            .map(|entry| *entry.key())
            .collect();

        idle.into_iter()
            .filter(|id| self.evict(*id, CloseReason::Idle))
            .count()
    }

    /// Close every connection, used on shutdown.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<RegistrationId> = self.connections.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.unregister(id))
            .map(|handle| handle.close(reason))
            .count()
    }
}

fn remove_from_index<T>(index: &DashMap<String, HashSet<T>>, key: &str, value: T)
where
    T: Eq + std::hash::Hash,
{
    let now_empty = match index.get_mut(key) {
        Some(mut set) => {
            set.remove(&value);
            set.is_empty()
        }
        None => false,
    };
    if now_empty {
        index.remove_if(key, |_, set| set.is_empty());
    }
}
