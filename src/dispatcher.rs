//! Drives one compilation request through its client's session.
//!
//! For every request the dispatcher pins the client session, waits for the
//! request's turn in the client's sequence, brings the session's view of
//! unloaded classes up to date and then runs the compilation exactly once.
//! Every step is undone on every exit path, panics included.

use parking_lot::Mutex;
use rjit_config::ServerConfig;
use rjit_session::{
    ClassId, ClientId, ClientSession, CompilationScratch, DeleteOutcome, DescriptorFetcher,
    ServerStream, SessionRegistry,
};
use rjit_utils::Stopwatch;
use std::sync::Arc;
use tracing::debug;

use crate::error::DispatchError;
use crate::request::CompilationRequest;

/// Everything a compilation may touch while it runs
pub struct CompilationContext<'a, S: ServerStream + ?Sized> {
    session: &'a ClientSession,
    stream: &'a mut S,
    scratch: CompilationScratch,
    seq_no: u32,
}

impl<'a, S: ServerStream + ?Sized> CompilationContext<'a, S> {
    fn new(session: &'a ClientSession, stream: &'a mut S, seq_no: u32) -> Self {
        Self {
            session,
            stream,
            scratch: CompilationScratch::new(),
            seq_no,
        }
    }

    pub fn session(&self) -> &ClientSession {
        self.session
    }

    pub fn seq_no(&self) -> u32 {
        self.seq_no
    }

    pub fn scratch(&self) -> &CompilationScratch {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut CompilationScratch {
        &mut self.scratch
    }

    /// Cache-first access to client metadata
    pub fn fetcher(&mut self) -> DescriptorFetcher<'_, S> {
        DescriptorFetcher::new(self.session, &mut *self.stream)
    }

    /// Raw access to the client connection, for exchanges the caches do
    /// not cover
    pub fn stream(&mut self) -> &mut S {
        self.stream
    }
}

/// Keeps a session pinned; releases it under the registry lock on drop
struct SessionLease<'a> {
    registry: &'a Mutex<SessionRegistry>,
    session: Arc<ClientSession>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.registry.lock().release(&self.session);
    }
}

pub struct CompilationDispatcher {
    registry: Mutex<SessionRegistry>,
}

impl CompilationDispatcher {
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_registry(SessionRegistry::from_server_config(config))
    }

    pub fn with_registry(registry: SessionRegistry) -> Self {
        Self {
            registry: Mutex::new(registry),
        }
    }

    /// Run `run` for `request` once it is the request's turn. The payload is
    /// handed to `run` together with a [`CompilationContext`] bound to the
    /// client's session.
    pub fn process<P, S, T, F>(
        &self,
        request: CompilationRequest<P>,
        stream: &mut S,
        run: F,
    ) -> Result<T, DispatchError>
    where
        S: ServerStream + ?Sized,
        F: FnOnce(&mut CompilationContext<'_, S>, P) -> anyhow::Result<T>,
    {
        let CompilationRequest {
            client_id,
            seq_no,
            unloaded_classes,
            payload,
        } = request;

        let session = {
            let mut registry = self.registry.lock();
            registry.sweep_stale();
            let (session, created) = registry.find_or_create(client_id, seq_no);
            session.acquire();
            if created {
                debug!(%client_id, seq_no, "first request of a new client session");
            }
            session
        };
        let _lease = SessionLease {
            registry: &self.registry,
            session: Arc::clone(&session),
        };

        let _turn = session.enter_turn(seq_no);

        if session.request_unloaded_classes() {
            DescriptorFetcher::new(&session, &mut *stream).sync_unloaded_classes()?;
        }
        session.apply_unloaded_classes(&unloaded_classes);

        // Dropped in reverse order: scratch, then turn, then lease.
        let mut context = CompilationContext::new(&session, stream, seq_no);
        let watch = Stopwatch::start_new();
        let result = run(&mut context, payload).map_err(DispatchError::from_compilation);
        debug!(
            %client_id,
            seq_no,
            elapsed = ?watch.elapsed(),
            ok = result.is_ok(),
            "compilation finished"
        );
        result
    }

    /// Apply an unload notification that arrived outside a compilation
    /// request. Returns `false` if the client has no session.
    pub fn notify_unloaded_classes(&self, client_id: ClientId, classes: &[ClassId]) -> bool {
        let Some(session) = self.registry.lock().find(client_id) else {
            return false;
        };
        session.apply_unloaded_classes(classes);
        true
    }

    pub fn delete_client_session(&self, client_id: ClientId, forced: bool) -> DeleteOutcome {
        self.registry.lock().delete(client_id, forced)
    }

    pub fn sweep_stale(&self) -> Option<usize> {
        self.registry.lock().sweep_stale()
    }

    pub fn find_session(&self, client_id: ClientId) -> Option<Arc<ClientSession>> {
        self.registry.lock().find(client_id)
    }

    pub fn session_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn print_stats(&self) {
        self.registry.lock().print_stats();
    }
}
