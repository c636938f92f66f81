mod client;
mod recorder;
mod registry;
#[doc(hidden)]
pub mod testing;

pub use client::{ClientHandle, ClientId, ClientStream, DeliveryError, CLIENT_QUEUE_CAPACITY};
pub use recorder::{LineRecorder, LineState};
pub use registry::{SessionOptions, SessionRegistry};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::pty::{PtyError, PtyProcess};

/// Size of a single PTY read. Each successful read is broadcast as one chunk.
const READ_BUFFER_SIZE: usize = 4096;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to start session: {0}")]
    Spawn(#[from] PtyError),

    #[error("session has terminated")]
    Terminated,

    #[error("session already has the maximum of {0} clients")]
    TooManyClients(usize),
}

struct SessionInner {
    clients: HashMap<ClientId, ClientHandle>,
    recorder: LineRecorder,
    terminated: bool,
}

/// One PTY-backed process and the clients currently attached to it.
///
/// The client set and the command recorder share one read/write lock:
/// broadcasts take it shared, membership changes and input recording take it
/// exclusively. The PTY handle and its writer have their own mutexes and are
/// released when the session terminates.
pub struct Session {
    id: String,
    command: String,
    created_at: SystemTime,
    pid: Option<u32>,
    max_clients: usize,
    pty: Mutex<Option<Box<dyn PtyProcess>>>,
    writer: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
    inner: RwLock<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Point-in-time description of a session, as served by `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub command: String,
    /// Unix timestamp, seconds.
    pub created_at: u64,
    pub clients: usize,
    pub read_only_clients: usize,
    pub commands: usize,
}

impl Session {
    /// Wrap a freshly spawned PTY. Returns the session and the PTY reader the
    /// output pump will consume.
    ///
    /// If the PTY's reader or writer cannot be taken, the PTY is closed
    /// before the error is returned.
    pub fn new(
        id: impl Into<String>,
        command: impl Into<String>,
        mut pty: Box<dyn PtyProcess>,
        max_clients: usize,
    ) -> Result<(Self, Box<dyn Read + Send>), SessionError> {
        let io = pty
            .take_reader()
            .and_then(|reader| pty.take_writer().map(|writer| (reader, writer)));
        let (reader, writer) = match io {
            Ok(io) => io,
            Err(e) => {
                pty.close();
                return Err(e.into());
            }
        };

        let session = Self {
            id: id.into(),
            command: command.into(),
            created_at: SystemTime::now(),
            pid: pty.pid(),
            max_clients,
            pty: Mutex::new(Some(pty)),
            writer: Arc::new(Mutex::new(Some(writer))),
            inner: RwLock::new(SessionInner {
                clients: HashMap::new(),
                recorder: LineRecorder::new(),
                terminated: false,
            }),
        };
        Ok((session, reader))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Start the output pump on the blocking pool.
    ///
    /// `on_exit` runs once the PTY reports end-of-stream or a read error,
    /// before clients are closed and the PTY is released.
    pub fn start<F>(self: &Arc<Self>, reader: Box<dyn Read + Send>, on_exit: F)
    where
        F: FnOnce(&Arc<Session>) + Send + 'static,
    {
        let session = Arc::clone(self);
        tokio::task::spawn_blocking(move || session.run(reader, on_exit));
    }

    /// The output pump: every read is broadcast as-is until the PTY closes.
    pub fn run<F>(self: Arc<Self>, mut reader: Box<dyn Read + Send>, on_exit: F)
    where
        F: FnOnce(&Arc<Session>),
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    tracing::debug!(session = %self.id, "pty reached end of stream");
                    break;
                }
                Ok(n) => {
                    self.broadcast(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(session = %self.id, error = %e, "pty read failed");
                    break;
                }
            }
        }

        on_exit(&self);
        self.terminate();
    }

    /// Queue `data` for every registered client. Returns how many clients
    /// accepted the chunk.
    ///
    /// A client whose queue is full or whose connection is gone misses this
    /// chunk; that is logged and delivery to the others continues. Such a
    /// client is not removed here, its connection task does that.
    pub fn broadcast(&self, data: Bytes) -> usize {
        let inner = self.inner.read();
        let mut delivered = 0;
        for client in inner.clients.values() {
            match client.deliver(data.clone()) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {
                    tracing::warn!(
                        session = %self.id,
                        client = %client.id(),
                        bytes = data.len(),
                        "client queue full, dropping output chunk"
                    );
                }
                Err(DeliveryError::Disconnected) => {
                    tracing::debug!(
                        session = %self.id,
                        client = %client.id(),
                        "client disconnected before output could be delivered"
                    );
                }
            }
        }
        delivered
    }

    /// Register a client. Fails if the session has already terminated or is
    /// at its client cap.
    pub fn add_client(&self, client: ClientHandle) -> Result<ClientId, SessionError> {
        let mut inner = self.inner.write();
        if inner.terminated {
            return Err(SessionError::Terminated);
        }
        if inner.clients.len() >= self.max_clients {
            return Err(SessionError::TooManyClients(self.max_clients));
        }
        let id = client.id();
        let read_only = client.is_read_only();
        inner.clients.insert(id, client);
        let total = inner.clients.len();
        drop(inner);

        tracing::info!(session = %self.id, client = %id, read_only, total, "client added");
        Ok(id)
    }

    /// Deregister a client and close its connection. Returns `false` if the
    /// client was not registered, which makes repeated calls harmless.
    pub fn remove_client(&self, id: ClientId) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.clients.remove(&id);
        let total = inner.clients.len();
        drop(inner);

        match removed {
            Some(client) => {
                drop(client);
                tracing::info!(session = %self.id, client = %id, total, "client removed");
                true
            }
            None => false,
        }
    }

    /// Write terminal input to the PTY.
    ///
    /// The write runs on the blocking pool; the writer lock keeps frames from
    /// concurrent clients from interleaving.
    pub async fn write(&self, data: Bytes) -> Result<(), PtyError> {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock();
            let writer = guard.as_mut().ok_or(PtyError::Closed)?;
            writer.write_all(&data)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| PtyError::Write(std::io::Error::other(e)))?
    }

    /// Change the PTY's window size. The most recent call wins.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        let pty = self.pty.lock();
        let pty = pty.as_ref().ok_or(PtyError::Closed)?;
        pty.resize(rows, cols)?;
        tracing::debug!(session = %self.id, rows, cols, "pty resized");
        Ok(())
    }

    /// Feed client input to the command recorder.
    pub fn process_input(&self, data: &[u8]) {
        let mut inner = self.inner.write();
        let submitted = inner.recorder.feed(data);
        let total = inner.recorder.log().len();
        drop(inner);

        for command in submitted {
            tracing::info!(session = %self.id, command = %command, total, "command logged");
        }
    }

    /// Snapshot of the submitted commands, oldest first.
    pub fn command_log(&self) -> Vec<String> {
        self.inner.read().recorder.log().to_vec()
    }

    /// The partially typed line not yet submitted.
    pub fn pending_input(&self) -> String {
        self.inner.read().recorder.pending()
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    pub fn has_client(&self, id: ClientId) -> bool {
        self.inner.read().clients.contains_key(&id)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.read().terminated
    }

    pub fn summary(&self) -> SessionSummary {
        let inner = self.inner.read();
        SessionSummary {
            id: self.id.clone(),
            command: self.command.clone(),
            created_at: self
                .created_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            clients: inner.clients.len(),
            read_only_clients: inner.clients.values().filter(|c| c.is_read_only()).count(),
            commands: inner.recorder.log().len(),
        }
    }

    /// Close every client and release the PTY. Only the first call has any
    /// effect; it returns `true`.
    ///
    /// Blocks while the PTY child is killed and reaped; async callers should
    /// go through [`SessionRegistry::shutdown`] or the blocking pool.
    pub fn terminate(&self) -> bool {
        let clients = {
            let mut inner = self.inner.write();
            if inner.terminated {
                return false;
            }
            inner.terminated = true;
            std::mem::take(&mut inner.clients)
        };
        let closed = clients.len();
        drop(clients);

        // Close the PTY before touching the writer: a write stuck on a full
        // input queue holds the writer lock until the child is gone.
        if let Some(mut pty) = self.pty.lock().take() {
            pty.close();
        }
        self.writer.lock().take();

        tracing::info!(session = %self.id, clients = closed, "session closed and cleaned up");
        true
    }
}
