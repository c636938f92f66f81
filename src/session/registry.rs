use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Session, SessionError};
use crate::pty::{PtySpawner, SpawnCommand};

/// Parameters applied to every session the registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Initial PTY height until a client sends a resize.
    pub rows: u16,
    /// Initial PTY width until a client sends a resize.
    pub cols: u16,
    /// Maximum concurrently registered clients per session.
    pub max_clients: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            max_clients: 64,
        }
    }
}

/// Live sessions keyed by identifier.
///
/// Sessions are created on first reference and remove themselves when their
/// PTY closes. Cloning shares the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    spawner: Arc<dyn PtySpawner>,
    options: SessionOptions,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(spawner: Arc<dyn PtySpawner>, options: SessionOptions) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            spawner,
            options,
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Return the live session for `id`, spawning `command` for it if there
    /// is none.
    ///
    /// The lookup, spawn and insert happen under one lock, so concurrent
    /// callers racing on a new identifier share a single process. A failed
    /// spawn registers nothing.
    pub fn get_or_create(
        &self,
        id: &str,
        command: &SpawnCommand,
    ) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(id) {
            return Ok(Arc::clone(session));
        }

        tracing::info!(session = %id, command = %command.display(), "creating session");
        let pty = self
            .spawner
            .spawn(command, self.options.rows, self.options.cols)?;
        let (session, reader) =
            Session::new(id, command.display(), pty, self.options.max_clients)?;
        let session = Arc::new(session);
        sessions.insert(id.to_string(), Arc::clone(&session));

        let registry = self.clone();
        session.start(reader, move |ended| {
            registry.remove_exact(ended);
        });

        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().get(id).cloned()
    }

    /// Remove the entry for `id`, if any.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().remove(id)
    }

    /// Remove `session` only if it is still the entry registered under its id.
    fn remove_exact(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock();
        let current = sessions
            .get(session.id())
            .is_some_and(|registered| Arc::ptr_eq(registered, session));
        if current {
            sessions.remove(session.id());
            tracing::debug!(session = %session.id(), "session deregistered");
        }
    }

    /// All live sessions, in no particular order.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and terminate every session. Used at process shutdown.
    ///
    /// Sessions are terminated after the registry lock is released.
    pub fn drain(&self) -> usize {
        let drained = self.take_all();
        for session in &drained {
            session.terminate();
        }
        drained.len()
    }

    /// Async form of [`drain`](Self::drain) for use on the runtime.
    ///
    /// Killing and reaping a child blocks, so each session is terminated on
    /// its own blocking task and the sessions close concurrently.
    pub async fn shutdown(&self) -> usize {
        let drained = self.take_all();
        let count = drained.len();
        let closing = drained.into_iter().map(|session| {
            tokio::task::spawn_blocking(move || {
                session.terminate();
            })
        });
        for result in futures::future::join_all(closing).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "session teardown task failed");
            }
        }
        count
    }

    fn take_all(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        sessions.drain().map(|(_, session)| session).collect()
    }
}
