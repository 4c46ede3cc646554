//! Surface session registry
//!
//! Durable mapping from external routing keys (a chat thread, a web tab, a
//! CLI workspace) to backend session ids. Each surface type owns one
//! registry and one file. The registry outlives session residency: a
//! mapping may point at a session that is paged out, or at one that was
//! ended, which callers must treat as "needs a new session".
//!
//! Every mutation is applied in memory first and then written through to
//! the store. A failed write is logged and the in-memory table stays
//! authoritative until the next successful write.

pub mod migration;
pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{Result, SessionError};
use crate::types::{BackendConfig, MappingRequest, SessionId, SurfaceSessionMapping};

pub use migration::routing_key;
pub use store::{JsonFileStore, MappingStore};

#[derive(Debug, Default)]
struct RegistryState {
    mappings: HashMap<String, SurfaceSessionMapping>,
    /// session id -> one routing key targeting it
    by_session: HashMap<SessionId, String>,
}

impl RegistryState {
    fn from_mappings(mappings: Vec<SurfaceSessionMapping>) -> Self {
        let mut state = Self::default();
        for mapping in mappings {
            state.insert(mapping);
        }
        state
    }

    fn insert(&mut self, mapping: SurfaceSessionMapping) -> Option<SurfaceSessionMapping> {
        let key = mapping.routing_key.clone();
        let session_id = mapping.session_id.clone();
        let previous = self.remove(&key);
        self.mappings.insert(key.clone(), mapping);
        self.by_session.insert(session_id, key);
        previous
    }

    fn remove(&mut self, key: &str) -> Option<SurfaceSessionMapping> {
        let removed = self.mappings.remove(key)?;
        if self.by_session.get(&removed.session_id).map(String::as_str) == Some(key) {
            self.by_session.remove(&removed.session_id);
            // Another key may still target the same session.
            if let Some(other) = self
                .mappings
                .values()
                .find(|m| m.session_id == removed.session_id)
            {
                self.by_session
                    .insert(removed.session_id.clone(), other.routing_key.clone());
            }
        }
        Some(removed)
    }

    fn active_for_user(&self, user_id: &str) -> usize {
        self.mappings
            .values()
            .filter(|m| m.is_active && m.created_by == user_id)
            .count()
    }

    /// Records in a stable order: oldest first, ties by key
    fn snapshot(&self) -> Vec<SurfaceSessionMapping> {
        let mut records: Vec<SurfaceSessionMapping> = self.mappings.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.routing_key.cmp(&b.routing_key))
        });
        records
    }
}

/// Routing table for one surface type
pub struct SurfaceSessionRegistry {
    surface: String,
    max_sessions_per_user: usize,
    store: Option<Arc<dyn MappingStore>>,
    state: Mutex<RegistryState>,
}

impl std::fmt::Debug for SurfaceSessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceSessionRegistry")
            .field("surface", &self.surface)
            .field("max_sessions_per_user", &self.max_sessions_per_user)
            .field("store", &self.store.as_ref().map(|_| "<store>"))
            .field("mappings", &self.len())
            .finish()
    }
}

impl SurfaceSessionRegistry {
    /// Open the registry file at `path`
    ///
    /// A missing file starts an empty table. An unreadable or corrupt file
    /// is logged and also starts empty rather than failing startup.
    pub fn open(
        surface: impl Into<String>,
        path: impl Into<PathBuf>,
        max_sessions_per_user: usize,
    ) -> Self {
        let surface = surface.into();
        let store = JsonFileStore::new(path, surface.clone());
        Self::with_store(surface, Arc::new(store), max_sessions_per_user)
    }

    /// Open the registry for `surface` under `config.registry_dir`
    pub fn open_for(config: &BackendConfig, surface: impl Into<String>) -> Self {
        let surface = surface.into();
        let path = config.registry_path(&surface);
        Self::open(surface, path, config.max_sessions_per_user)
    }

    /// Registry backed by an arbitrary store
    pub fn with_store(
        surface: impl Into<String>,
        store: Arc<dyn MappingStore>,
        max_sessions_per_user: usize,
    ) -> Self {
        let registry = Self {
            surface: surface.into(),
            max_sessions_per_user,
            store: Some(store),
            state: Mutex::new(RegistryState::default()),
        };
        registry.reload();
        registry
    }

    /// Registry that is never persisted
    pub fn in_memory(surface: impl Into<String>, max_sessions_per_user: usize) -> Self {
        Self {
            surface: surface.into(),
            max_sessions_per_user,
            store: None,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Surface this registry belongs to
    #[must_use]
    pub fn surface(&self) -> &str {
        &self.surface
    }

    /// Replace the in-memory table with what the store holds
    ///
    /// Returns the number of mappings loaded.
    pub fn reload(&self) -> usize {
        let Some(store) = &self.store else {
            return self.len();
        };

        let mappings = match store.load() {
            Ok(mappings) => mappings,
            Err(e) => {
                log::error!(
                    "[{}] Failed to load session registry, starting empty: {e}",
                    self.surface
                );
                Vec::new()
            }
        };

        let state = RegistryState::from_mappings(mappings);
        let count = state.mappings.len();
        *self.state.lock() = state;
        log::debug!("[{}] Loaded {count} session mapping(s)", self.surface);
        count
    }

    fn persist(&self, state: &RegistryState) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(&state.snapshot())
        {
            log::error!("[{}] Failed to persist session registry: {e}", self.surface);
        }
    }

    fn build_mapping(
        &self,
        routing_key: String,
        session_id: SessionId,
        request: MappingRequest,
    ) -> SurfaceSessionMapping {
        let now = Utc::now();
        SurfaceSessionMapping {
            routing_key,
            session_id,
            surface: self.surface.clone(),
            created_by: request.user_id,
            project_id: request.project_id,
            description: request.description,
            created_at: now,
            last_active: now,
            is_active: true,
            extra: request.extra,
        }
    }

    /// Map `routing_key` to `session_id`, replacing any existing mapping
    pub fn register(
        &self,
        routing_key: impl Into<String>,
        session_id: impl Into<SessionId>,
        request: MappingRequest,
    ) -> SurfaceSessionMapping {
        let mapping = self.build_mapping(routing_key.into(), session_id.into(), request);

        let mut state = self.state.lock();
        if let Some(previous) = state.insert(mapping.clone()) {
            log::debug!(
                "[{}] Routing key {} moved from session {} to {}",
                self.surface,
                mapping.routing_key,
                previous.session_id,
                mapping.session_id
            );
        }
        self.persist(&state);
        drop(state);

        log::info!(
            "[{}] Registered {} -> {}",
            self.surface,
            mapping.routing_key,
            mapping.session_id
        );
        mapping
    }

    /// Map `routing_key` to `session_id` only if the key is free
    ///
    /// # Errors
    /// Returns `RoutingKeyConflict` naming the current owner if the key is
    /// already mapped
    pub fn register_if_absent(
        &self,
        routing_key: impl Into<String>,
        session_id: impl Into<SessionId>,
        request: MappingRequest,
    ) -> Result<SurfaceSessionMapping> {
        let mapping = self.build_mapping(routing_key.into(), session_id.into(), request);

        let mut state = self.state.lock();
        if let Some(existing) = state.mappings.get(&mapping.routing_key) {
            return Err(SessionError::routing_key_conflict(
                existing.routing_key.as_str(),
                existing.session_id.as_str(),
            ));
        }
        state.insert(mapping.clone());
        self.persist(&state);
        Ok(mapping)
    }

    /// Mapping for `routing_key`
    #[must_use]
    pub fn lookup(&self, routing_key: &str) -> Option<SurfaceSessionMapping> {
        self.state.lock().mappings.get(routing_key).cloned()
    }

    /// Mapping targeting `session_id`
    #[must_use]
    pub fn lookup_by_session_id(&self, session_id: &SessionId) -> Option<SurfaceSessionMapping> {
        let state = self.state.lock();
        state
            .by_session
            .get(session_id)
            .and_then(|key| state.mappings.get(key))
            .cloned()
    }

    /// Touch `last_active`; no-op if the key is unknown
    pub fn update_activity(&self, routing_key: &str) -> bool {
        let mut state = self.state.lock();
        let Some(mapping) = state.mappings.get_mut(routing_key) else {
            return false;
        };
        mapping.last_active = Utc::now();
        self.persist(&state);
        true
    }

    /// Mark a mapping ended but keep it for history
    ///
    /// Returns false if the key is unknown or already inactive.
    pub fn deactivate(&self, routing_key: &str) -> bool {
        self.set_active(routing_key, false)
    }

    /// Mark a mapping active again and refresh `last_active`
    ///
    /// Returns false if the key is unknown or already active.
    pub fn reactivate(&self, routing_key: &str) -> bool {
        self.set_active(routing_key, true)
    }

    fn set_active(&self, routing_key: &str, active: bool) -> bool {
        let mut state = self.state.lock();
        let Some(mapping) = state.mappings.get_mut(routing_key) else {
            return false;
        };
        if mapping.is_active == active {
            return false;
        }
        mapping.is_active = active;
        if active {
            mapping.last_active = Utc::now();
        }
        self.persist(&state);
        log::debug!(
            "[{}] Routing key {routing_key} {}",
            self.surface,
            if active { "reactivated" } else { "deactivated" }
        );
        true
    }

    /// Deactivate every mapping targeting `session_id`, e.g. after it ended
    ///
    /// Returns the number of mappings changed.
    pub fn deactivate_by_session_id(&self, session_id: &SessionId) -> usize {
        let mut state = self.state.lock();
        let mut changed = 0;
        for mapping in state.mappings.values_mut() {
            if mapping.session_id == *session_id && mapping.is_active {
                mapping.is_active = false;
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist(&state);
        }
        changed
    }

    /// Delete a mapping outright
    pub fn remove(&self, routing_key: &str) -> Option<SurfaceSessionMapping> {
        let mut state = self.state.lock();
        let removed = state.remove(routing_key)?;
        self.persist(&state);
        Some(removed)
    }

    /// Number of active mappings created by `user_id`
    #[must_use]
    pub fn active_count_for_user(&self, user_id: &str) -> usize {
        self.state.lock().active_for_user(user_id)
    }

    /// Check `user_id` may create another mapping
    ///
    /// # Errors
    /// Returns `UserLimitReached` once the user's active mappings reach the
    /// configured cap; inactive mappings do not count
    pub fn check_limit(&self, user_id: &str) -> Result<()> {
        let active = self.active_count_for_user(user_id);
        if active >= self.max_sessions_per_user {
            return Err(SessionError::user_limit_reached(
                user_id,
                self.max_sessions_per_user,
            ));
        }
        Ok(())
    }

    /// Move a mapping from `old_key` to `new_key`
    ///
    /// Runs as one critical section: the mapping is never reachable under
    /// both keys, nor under neither. All non-key fields are kept.
    ///
    /// # Errors
    /// Returns `RoutingKeyNotFound` if `old_key` is unknown, or
    /// `RoutingKeyConflict` if `new_key` already maps to a different session
    pub fn rekey(&self, old_key: &str, new_key: impl Into<String>) -> Result<SurfaceSessionMapping> {
        let new_key = new_key.into();
        let mut state = self.state.lock();

        let Some(current) = state.mappings.get(old_key) else {
            return Err(SessionError::routing_key_not_found(old_key));
        };
        if old_key == new_key {
            return Ok(current.clone());
        }
        if let Some(occupant) = state.mappings.get(&new_key)
            && occupant.session_id != current.session_id
        {
            return Err(SessionError::routing_key_conflict(
                new_key,
                occupant.session_id.as_str(),
            ));
        }

        let Some(mut mapping) = state.remove(old_key) else {
            return Err(SessionError::routing_key_not_found(old_key));
        };
        mapping.routing_key = new_key;
        state.insert(mapping.clone());
        self.persist(&state);
        drop(state);

        log::debug!(
            "[{}] Rekeyed {old_key} -> {} ({})",
            self.surface,
            mapping.routing_key,
            mapping.session_id
        );
        Ok(mapping)
    }

    /// All active mappings, oldest first
    #[must_use]
    pub fn list_active(&self) -> Vec<SurfaceSessionMapping> {
        self.state
            .lock()
            .snapshot()
            .into_iter()
            .filter(|m| m.is_active)
            .collect()
    }

    /// All mappings created by `user_id`, oldest first
    #[must_use]
    pub fn list_for_user(&self, user_id: &str) -> Vec<SurfaceSessionMapping> {
        self.state
            .lock()
            .snapshot()
            .into_iter()
            .filter(|m| m.created_by == user_id)
            .collect()
    }

    /// Number of mappings, active or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().mappings.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().mappings.is_empty()
    }
}
