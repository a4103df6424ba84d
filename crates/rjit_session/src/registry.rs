//! Client identity to session mapping.
//!
//! The registry is not synchronized on its own. Callers keep it behind one
//! coarse lock and hold that lock for every call, including
//! [`SessionRegistry::release`].

use ahash::AHashMap;
use rjit_config::{RegistryConfig, SequencerConfig, ServerConfig};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::ids::ClientId;
use crate::sequencer::FIRST_SEQ_NO;
use crate::session::ClientSession;

/// What [`SessionRegistry::delete`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Nothing was registered for the client
    NotFound,
    /// The session was idle and has been destroyed
    Removed,
    /// The session is in use; it stays registered, marked, until released
    Deferred,
    /// The session is in use; it was detached from its client so the next
    /// request starts afresh, and is destroyed once released
    Retired,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: AHashMap<ClientId, Arc<ClientSession>>,
    /// Marked sessions detached from their key but still pinned by workers
    retired: Vec<Arc<ClientSession>>,
    last_sweep: Instant,
    config: RegistryConfig,
    sequencer_config: SequencerConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, sequencer_config: SequencerConfig) -> Self {
        Self::starting_at(Instant::now(), config, sequencer_config)
    }

    /// A registry whose sweep clock starts at `now`
    pub fn starting_at(
        now: Instant,
        config: RegistryConfig,
        sequencer_config: SequencerConfig,
    ) -> Self {
        Self {
            sessions: AHashMap::new(),
            retired: Vec::new(),
            last_sweep: now,
            config,
            sequencer_config,
        }
    }

    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self::new(config.registry.clone(), config.sequencer.clone())
    }

    /// Return the live session of `client_id`, creating it if there is none.
    /// A session marked for deletion is never returned; it is replaced. A new
    /// session admits `seq_no` first.
    pub fn find_or_create(
        &mut self,
        client_id: ClientId,
        seq_no: u32,
    ) -> (Arc<ClientSession>, bool) {
        if let Some(existing) = self.sessions.get(&client_id) {
            if !existing.is_marked_for_deletion() {
                existing.touch();
                return (Arc::clone(existing), false);
            }
            if let Some(condemned) = self.sessions.remove(&client_id) {
                self.discard(condemned);
            }
        }

        let session = Arc::new(ClientSession::starting_at(
            client_id,
            seq_no,
            &self.sequencer_config,
        ));
        if seq_no > FIRST_SEQ_NO {
            // The client has been talking to someone before; whatever it
            // unloaded meanwhile is unknown here.
            session.set_request_unloaded_classes(true);
        }
        info!(%client_id, seq_no, "created client session");
        self.sessions.insert(client_id, Arc::clone(&session));
        (session, true)
    }

    /// Raw lookup, marked sessions included
    pub fn find(&self, client_id: ClientId) -> Option<Arc<ClientSession>> {
        self.sessions.get(&client_id).cloned()
    }

    /// Mark the session of `client_id` for deletion and destroy it if no
    /// worker uses it. When `forced`, a session in use is detached from its
    /// client right away instead of staying registered.
    pub fn delete(&mut self, client_id: ClientId, forced: bool) -> DeleteOutcome {
        let Some(session) = self.sessions.get(&client_id) else {
            debug!(%client_id, "no client session to delete");
            return DeleteOutcome::NotFound;
        };
        session.mark_for_deletion();

        if session.in_use() == 0 {
            self.sessions.remove(&client_id);
            info!(%client_id, "destroyed client session");
            DeleteOutcome::Removed
        } else if forced {
            if let Some(session) = self.sessions.remove(&client_id) {
                self.discard(session);
            }
            DeleteOutcome::Retired
        } else {
            info!(
                %client_id,
                in_use = session.in_use(),
                "client session in use, deletion deferred"
            );
            DeleteOutcome::Deferred
        }
    }

    /// Unpin `session` for one worker. A marked session reaching zero is
    /// destroyed.
    pub fn release(&mut self, session: &Arc<ClientSession>) {
        if session.release() > 0 || !session.is_marked_for_deletion() {
            return;
        }
        let client_id = session.client_id();
        let mapped = self
            .sessions
            .get(&client_id)
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if mapped {
            self.sessions.remove(&client_id);
        } else {
            self.retired.retain(|other| !Arc::ptr_eq(other, session));
        }
        info!(%client_id, "destroyed client session after last release");
    }

    /// Run a staleness sweep if the configured interval has elapsed.
    /// Returns the number of sessions removed, or `None` if it was too soon.
    pub fn sweep_stale(&mut self) -> Option<usize> {
        self.sweep_stale_at(Instant::now())
    }

    pub fn sweep_stale_at(&mut self, now: Instant) -> Option<usize> {
        if now.saturating_duration_since(self.last_sweep) < self.config.sweep_interval() {
            return None;
        }
        self.last_sweep = now;

        let age = self.config.stale_age();
        let before = self.sessions.len();
        self.sessions.retain(|client_id, session| {
            let stale = session.in_use() == 0 && session.is_stale_at(now, age);
            if stale {
                debug!(%client_id, "evicting stale client session");
            }
            !stale
        });
        self.retired.retain(|session| session.in_use() > 0);

        let removed = before - self.sessions.len();
        info!(removed, remaining = self.sessions.len(), "swept stale client sessions");
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions detached from their client and still waiting for release
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    pub fn print_stats(&self) {
        info!(
            sessions = self.sessions.len(),
            retired = self.retired.len(),
            "client session registry"
        );
        for (client_id, session) in &self.sessions {
            let stats = session.stats_snapshot();
            info!(
                %client_id,
                in_use = session.in_use(),
                classes = session.cached_class_count(),
                class_hit_pct = stats.classes.hit_percent(),
                method_hit_pct = stats.methods.hit_percent(),
                bulk_fetches = stats.bulk_fetches,
                incremental_fetches = stats.incremental_fetches,
                parked = stats.sequencer.parked,
                gaps_bridged = stats.sequencer.gaps_bridged,
                "client session stats"
            );
        }
    }

    fn discard(&mut self, session: Arc<ClientSession>) {
        let client_id = session.client_id();
        if session.in_use() == 0 {
            info!(%client_id, "destroyed client session");
        } else {
            info!(
                %client_id,
                in_use = session.in_use(),
                "retired client session still in use"
            );
            self.retired.push(session);
        }
    }
}
