//! In-process session registry.
//!
//! The store is responsible for:
//! - Atomic get-or-create of sessions by client-supplied id
//! - Granting exclusive generation leases (one per session, non-blocking)
//! - Evicting idle sessions without ever racing an active lease
//!
//! Each entry is guarded independently (DashMap sharding plus a per-entry
//! state lock), so unrelated sessions never contend. The per-entry state
//! lock is a `std::sync::Mutex` and is never held across an await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::Turn;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by session store operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Another generation is already in flight for this session.
    #[error("a generation is already in flight for this session")]
    SessionBusy,

    /// The session was reset or evicted while the lease was held.
    #[error("session was removed while the lease was held")]
    StaleLease,
}

// ============================================================================
// Session Entry
// ============================================================================

struct SessionEntry {
    id: String,
    created_at: DateTime<Utc>,
    /// At most one generation per session; set via CAS by `acquire_for_generation`.
    in_flight: AtomicBool,
    state: Mutex<SessionState>,
}

struct SessionState {
    turns: Vec<Turn>,
    last_active_at: DateTime<Utc>,
}

impl SessionEntry {
    fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            in_flight: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                turns: Vec::new(),
                last_active_at: now,
            }),
        }
    }
}

type Registry = Arc<DashMap<String, Arc<SessionEntry>>>;

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time copy of one session, for introspection endpoints.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub busy: bool,
}

// ============================================================================
// Session Store
// ============================================================================

/// Keyed registry of conversation state. Thread-safe and cheap to clone.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Registry,
}

impl SessionStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    fn get_or_create_entry(&self, id: &str) -> Arc<SessionEntry> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(SessionEntry::new(id)))
            .clone()
    }

    /// Acquire exclusive generation rights for a session, creating the
    /// session if it does not exist yet.
    ///
    /// Fails immediately with `SessionBusy` if another generation is in
    /// flight; concurrent turns are rejected, not queued, so context order
    /// stays deterministic. If the eviction sweep removes the entry between
    /// the lookup and the flag CAS, the acquire retries against a fresh
    /// entry - an evicted session behaves as session creation, never as an
    /// error.
    pub fn acquire_for_generation(&self, id: &str) -> Result<GenerationLease, StoreError> {
        loop {
            let entry = self.get_or_create_entry(id);

            if entry
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(StoreError::SessionBusy);
            }

            let still_live = self
                .sessions
                .get(id)
                .map(|e| Arc::ptr_eq(e.value(), &entry))
                .unwrap_or(false);
            if still_live {
                return Ok(GenerationLease {
                    sessions: self.sessions.clone(),
                    entry,
                    released: false,
                });
            }

            // Entry was evicted out from under us; release the orphan and retry.
            entry.in_flight.store(false, Ordering::Release);
        }
    }

    /// Get a point-in-time snapshot of a session.
    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        let entry = self.sessions.get(id)?.clone();
        let state = entry.state.lock().expect("session state poisoned");
        Some(SessionSnapshot {
            id: entry.id.clone(),
            turns: state.turns.clone(),
            created_at: entry.created_at,
            last_active_at: state.last_active_at,
            busy: entry.in_flight.load(Ordering::Acquire),
        })
    }

    /// List snapshots of all sessions.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        // Collect entries first to avoid holding DashMap references while locking.
        let entries: Vec<_> = self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .collect();

        entries
            .into_iter()
            .map(|entry| {
                let state = entry.state.lock().expect("session state poisoned");
                SessionSnapshot {
                    id: entry.id.clone(),
                    turns: state.turns.clone(),
                    created_at: entry.created_at,
                    last_active_at: state.last_active_at,
                    busy: entry.in_flight.load(Ordering::Acquire),
                }
            })
            .collect()
    }

    /// Check if a session exists.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Remove a session (explicit reset). Returns true if it existed.
    ///
    /// An in-flight generation on the removed session will fail its commit
    /// with `StaleLease`; the next request with this id creates a fresh
    /// session.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Get the number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle for longer than `max_idle`.
    ///
    /// The idle check and the lease-free check happen together under the
    /// shard lock, so a session holding an active lease is never evicted.
    /// Returns the number of sessions removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(idle)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.sessions.len();

        self.sessions.retain(|_, entry| {
            if entry.in_flight.load(Ordering::Acquire) {
                return true;
            }
            let state = entry.state.lock().expect("session state poisoned");
            state.last_active_at >= cutoff
        });

        before - self.sessions.len()
    }

    /// Spawn a background task that periodically evicts idle sessions.
    ///
    /// Runs until the runtime shuts down.
    pub fn spawn_eviction_task(self, interval: Duration, max_idle: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.evict_idle(max_idle);
                if removed > 0 {
                    debug!(removed, remaining = self.len(), "Evicted idle sessions");
                }
            }
        });
    }
}

// ============================================================================
// Generation Lease
// ============================================================================

/// Exclusive, scoped mutation right over one session for the duration of
/// one generation.
///
/// Released on drop, on every exit path. Use-after-release is prevented
/// statically: appending goes through the lease, and the lease cannot
/// outlive its release.
pub struct GenerationLease {
    sessions: Registry,
    entry: Arc<SessionEntry>,
    released: bool,
}

impl GenerationLease {
    /// The id of the leased session.
    pub fn session_id(&self) -> &str {
        &self.entry.id
    }

    /// Copy the session's turns, most recent `limit` if one is given
    /// (oldest turns dropped first).
    pub fn context(&self, limit: Option<usize>) -> Vec<Turn> {
        let state = self.entry.state.lock().expect("session state poisoned");
        match limit {
            Some(n) if state.turns.len() > n => state.turns[state.turns.len() - n..].to_vec(),
            _ => state.turns.clone(),
        }
    }

    /// Append a turn under the held lease and refresh `last_active_at`.
    ///
    /// Fails with `StaleLease` if the session was reset or evicted while
    /// this lease was held; nothing is written in that case.
    pub fn append_turn(&self, turn: Turn) -> Result<(), StoreError> {
        let still_live = self
            .sessions
            .get(&self.entry.id)
            .map(|e| Arc::ptr_eq(e.value(), &self.entry))
            .unwrap_or(false);
        if !still_live {
            return Err(StoreError::StaleLease);
        }

        let mut state = self.entry.state.lock().expect("session state poisoned");
        state.turns.push(turn);
        state.last_active_at = Utc::now();
        Ok(())
    }

    /// Release the lease explicitly. Dropping the lease has the same effect.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.entry.in_flight.store(false, Ordering::Release);
        }
    }
}

impl Drop for GenerationLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for GenerationLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationLease")
            .field("session_id", &self.entry.id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TurnRole;

    #[test]
    fn acquire_creates_session() {
        let store = SessionStore::new();
        assert!(store.is_empty());

        let lease = store.acquire_for_generation("demo").unwrap();
        assert_eq!(lease.session_id(), "demo");
        assert_eq!(store.len(), 1);
        assert!(store.contains("demo"));
        assert!(format!("{lease:?}").contains("demo"));
    }

    #[test]
    fn second_acquire_fails_while_lease_held() {
        let store = SessionStore::new();

        let _lease = store.acquire_for_generation("demo").unwrap();
        let err = store.acquire_for_generation("demo").unwrap_err();
        assert_eq!(err, StoreError::SessionBusy);
    }

    #[test]
    fn acquire_succeeds_after_release() {
        let store = SessionStore::new();

        let lease = store.acquire_for_generation("demo").unwrap();
        lease.release();

        assert!(store.acquire_for_generation("demo").is_ok());
    }

    #[test]
    fn drop_releases_lease() {
        let store = SessionStore::new();

        {
            let _lease = store.acquire_for_generation("demo").unwrap();
        }

        assert!(store.acquire_for_generation("demo").is_ok());
    }

    #[test]
    fn distinct_sessions_acquire_concurrently() {
        let store = SessionStore::new();

        let a = store.acquire_for_generation("a").unwrap();
        let b = store.acquire_for_generation("b").unwrap();

        assert_eq!(a.session_id(), "a");
        assert_eq!(b.session_id(), "b");
    }

    #[test]
    fn append_turn_updates_history_and_activity() {
        let store = SessionStore::new();

        let lease = store.acquire_for_generation("demo").unwrap();
        let before = store.snapshot("demo").unwrap().last_active_at;

        lease.append_turn(Turn::user("hello")).unwrap();
        lease.append_turn(Turn::assistant("hi there")).unwrap();
        lease.release();

        let snapshot = store.snapshot("demo").unwrap();
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.turns[0].role, TurnRole::User);
        assert_eq!(snapshot.turns[0].text, "hello");
        assert_eq!(snapshot.turns[1].role, TurnRole::Assistant);
        assert!(snapshot.last_active_at >= before);
        assert!(!snapshot.busy);
    }

    #[test]
    fn snapshot_reports_busy_while_leased() {
        let store = SessionStore::new();

        let _lease = store.acquire_for_generation("demo").unwrap();
        assert!(store.snapshot("demo").unwrap().busy);
    }

    #[test]
    fn append_after_reset_is_stale() {
        let store = SessionStore::new();

        let lease = store.acquire_for_generation("demo").unwrap();
        assert!(store.remove("demo"));

        let err = lease.append_turn(Turn::user("hello")).unwrap_err();
        assert_eq!(err, StoreError::StaleLease);
    }

    #[test]
    fn context_caps_to_most_recent() {
        let store = SessionStore::new();

        let lease = store.acquire_for_generation("demo").unwrap();
        for i in 0..5 {
            lease.append_turn(Turn::user(format!("m{i}"))).unwrap();
        }

        let all = lease.context(None);
        assert_eq!(all.len(), 5);

        let capped = lease.context(Some(2));
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].text, "m3");
        assert_eq!(capped[1].text, "m4");

        let generous = lease.context(Some(100));
        assert_eq!(generous.len(), 5);
    }

    #[test]
    fn evict_removes_idle_sessions_only() {
        let store = SessionStore::new();

        {
            let lease = store.acquire_for_generation("idle").unwrap();
            lease.append_turn(Turn::user("hello")).unwrap();
        }

        // Zero max idle: everything lease-free is evictable.
        let removed = store.evict_idle(Duration::ZERO);
        assert_eq!(removed, 1);
        assert!(!store.contains("idle"));
    }

    #[test]
    fn evict_skips_sessions_with_active_lease() {
        let store = SessionStore::new();

        let _lease = store.acquire_for_generation("active").unwrap();

        let removed = store.evict_idle(Duration::ZERO);
        assert_eq!(removed, 0);
        assert!(store.contains("active"));
    }

    #[test]
    fn evicted_session_recreated_on_next_acquire() {
        let store = SessionStore::new();

        {
            let lease = store.acquire_for_generation("demo").unwrap();
            lease.append_turn(Turn::user("old")).unwrap();
        }
        store.evict_idle(Duration::ZERO);

        let lease = store.acquire_for_generation("demo").unwrap();
        assert!(lease.context(None).is_empty());
    }

    #[test]
    fn list_reports_all_sessions() {
        let store = SessionStore::new();

        store.acquire_for_generation("a").unwrap().release();
        store.acquire_for_generation("b").unwrap().release();

        let mut ids: Vec<_> = store.list().into_iter().map(|s| s.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn remove_unknown_session_is_false() {
        let store = SessionStore::new();
        assert!(!store.remove("nope"));
    }
}
