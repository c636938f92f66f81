use bytes::Bytes;
use tokio::sync::mpsc;

/// Per-client outbound queue depth, in PTY output chunks.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Opaque identifier for a registered client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a chunk could not be queued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("client queue is full")]
    Full,
    #[error("client connection is gone")]
    Disconnected,
}

/// The session's side of a client connection.
///
/// Owned by the session's client set. Dropping the handle closes the
/// connection: the paired [`ClientStream`] yields the chunks already queued
/// and then `None`.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    read_only: bool,
    tx: mpsc::Sender<Bytes>,
}

/// The connection's side: PTY output waiting to be written to the transport.
#[derive(Debug)]
pub struct ClientStream {
    rx: mpsc::Receiver<Bytes>,
}

impl ClientHandle {
    pub fn new(read_only: bool) -> (Self, ClientStream) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let handle = Self {
            id: ClientId::new(),
            read_only,
            tx,
        };
        (handle, ClientStream { rx })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Queue a chunk without waiting.
    pub fn deliver(&self, data: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Disconnected,
        })
    }
}

impl ClientStream {
    /// Next chunk of output, or `None` once the session has closed this client.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv), used by tests.
    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}
