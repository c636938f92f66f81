//! PTY test doubles: a scripted reader, a recording writer and a counting
//! spawner. Shared by the unit tests and the integration tests in `tests/`.

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::pty::{PtyError, PtyProcess, PtySpawner, SpawnCommand};

#[derive(Default)]
struct Shared {
    output: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    written: Mutex<Vec<u8>>,
    write_calls: AtomicUsize,
    resizes: Mutex<Vec<(u16, u16)>>,
    closes: AtomicUsize,
    stall_writes: AtomicBool,
}

/// Test-side control over a [`FakePty`].
#[derive(Clone)]
pub struct FakePtyControl {
    shared: Arc<Shared>,
}

impl FakePtyControl {
    /// Make `data` available to the next PTY read.
    pub fn emit(&self, data: &[u8]) {
        if let Some(tx) = self.shared.output.lock().as_ref() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// Simulate the process exiting: the reader sees end-of-stream.
    pub fn hang_up(&self) {
        self.shared.output.lock().take();
    }

    pub fn written(&self) -> Vec<u8> {
        self.shared.written.lock().clone()
    }

    pub fn write_calls(&self) -> usize {
        self.shared.write_calls.load(Ordering::Acquire)
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.shared.resizes.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::Acquire)
    }

    /// Writes block until the PTY is closed and then fail, like a process
    /// that never drains its input.
    pub fn stall_writes(&self) {
        self.shared.stall_writes.store(true, Ordering::Release);
    }
}

pub struct FakePty {
    shared: Arc<Shared>,
    reader: Option<ScriptedReader>,
    fail_writer: bool,
}

impl FakePty {
    pub fn new() -> (Self, FakePtyControl) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared::default());
        *shared.output.lock() = Some(tx);
        let pty = Self {
            shared: Arc::clone(&shared),
            reader: Some(ScriptedReader {
                rx,
                pending: Vec::new(),
            }),
            fail_writer: false,
        };
        (pty, FakePtyControl { shared })
    }

    pub fn fail_writer(&mut self) {
        self.fail_writer = true;
    }
}

impl PtyProcess for FakePty {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError> {
        match self.reader.take() {
            Some(reader) => Ok(Box::new(reader)),
            None => Err(PtyError::CloneReader(anyhow::anyhow!("reader already taken"))),
        }
    }

    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        if self.fail_writer {
            return Err(PtyError::TakeWriter(anyhow::anyhow!("writer unavailable")));
        }
        Ok(Box::new(RecordingWriter {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.shared.resizes.lock().push((rows, cols));
        Ok(())
    }

    fn close(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::AcqRel);
        // Unblocks the reader so the pump can finish.
        self.shared.output.lock().take();
    }
}

struct ScriptedReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct RecordingWriter {
    shared: Arc<Shared>,
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.shared.write_calls.fetch_add(1, Ordering::AcqRel);
        if self.shared.stall_writes.load(Ordering::Acquire) {
            while self.shared.closes.load(Ordering::Acquire) == 0 {
                std::thread::sleep(Duration::from_millis(5));
            }
            return Err(std::io::Error::from_raw_os_error(5));
        }
        self.shared.written.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Spawner that hands out [`FakePty`]s and remembers their controls.
#[derive(Default)]
pub struct FakeSpawner {
    spawned: AtomicUsize,
    controls: Mutex<Vec<FakePtyControl>>,
    failing: AtomicBool,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::Acquire)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Control for the `index`-th spawned PTY.
    pub fn control(&self, index: usize) -> FakePtyControl {
        self.controls.lock()[index].clone()
    }
}

impl PtySpawner for FakeSpawner {
    fn spawn(
        &self,
        _command: &SpawnCommand,
        _rows: u16,
        _cols: u16,
    ) -> Result<Box<dyn PtyProcess>, PtyError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(PtyError::SpawnCommand(anyhow::anyhow!("spawn refused")));
        }
        let (pty, control) = FakePty::new();
        self.controls.lock().push(control);
        self.spawned.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(pty))
    }
}
