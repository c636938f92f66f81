use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] anyhow::Error),

    #[error("failed to spawn command: {0}")]
    SpawnCommand(#[source] anyhow::Error),

    #[error("failed to clone reader: {0}")]
    CloneReader(#[source] anyhow::Error),

    #[error("failed to take writer: {0}")]
    TakeWriter(#[source] anyhow::Error),

    #[error("failed to resize pty: {0}")]
    Resize(#[source] anyhow::Error),

    #[error("failed to write to pty: {0}")]
    Write(#[from] std::io::Error),

    #[error("pty is closed")]
    Closed,
}

/// The command a session runs inside its PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SpawnCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build a command from an argv-style list. An empty list yields the
    /// default shell.
    pub fn from_argv(argv: Vec<String>) -> Self {
        let mut iter = argv.into_iter();
        match iter.next() {
            Some(program) => Self::new(program, iter.collect()),
            None => Self::default(),
        }
    }

    /// Human-readable form, e.g. `bash -l`.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

impl Default for SpawnCommand {
    /// `$SHELL`, falling back to `/bin/sh`.
    fn default() -> Self {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        Self::new(shell, Vec::new())
    }
}

/// A running process attached to a pseudo-terminal.
///
/// The reader and writer can each be taken once; the session pump owns the
/// reader and the session's input path owns the writer. `close` releases the
/// PTY and terminates the process.
pub trait PtyProcess: Send {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError>;

    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError>;

    fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError>;

    fn pid(&self) -> Option<u32> {
        None
    }

    fn close(&mut self);
}

/// Spawns commands attached to fresh PTYs.
pub trait PtySpawner: Send + Sync {
    fn spawn(
        &self,
        command: &SpawnCommand,
        rows: u16,
        cols: u16,
    ) -> Result<Box<dyn PtyProcess>, PtyError>;
}

/// [`PtySpawner`] backed by the operating system's PTY implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

impl PtySpawner for NativePtySpawner {
    fn spawn(
        &self,
        command: &SpawnCommand,
        rows: u16,
        cols: u16,
    ) -> Result<Box<dyn PtyProcess>, PtyError> {
        Ok(Box::new(Pty::spawn(command, rows, cols)?))
    }
}

pub struct Pty {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
}

impl Pty {
    pub fn spawn(command: &SpawnCommand, rows: u16, cols: u16) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(rows, cols))
            .map_err(PtyError::OpenPty)?;

        let mut cmd = CommandBuilder::new(&command.program);
        cmd.args(&command.args);
        cmd.env("TERM", std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()));
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(PtyError::SpawnCommand)?;
        // Only the child may hold the slave side, otherwise the master never
        // sees EOF when the child exits.
        drop(pair.slave);

        Ok(Self {
            master: pair.master,
            child,
        })
    }
}

impl PtyProcess for Pty {
    fn take_reader(&mut self) -> Result<Box<dyn Read + Send>, PtyError> {
        self.master.try_clone_reader().map_err(PtyError::CloneReader)
    }

    fn take_writer(&mut self) -> Result<Box<dyn Write + Send>, PtyError> {
        self.master.take_writer().map_err(PtyError::TakeWriter)
    }

    fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.master
            .resize(pty_size(rows, cols))
            .map_err(PtyError::Resize)
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn close(&mut self) {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!(?status, "pty child already exited");
            return;
        }
        if let Err(e) = self.child.kill() {
            tracing::debug!(error = %e, "failed to kill pty child");
        }
        match self.child.wait() {
            Ok(status) => tracing::debug!(?status, "pty child reaped"),
            Err(e) => tracing::warn!(error = %e, "failed to reap pty child"),
        }
    }
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
