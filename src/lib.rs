//! ttyshare - share a terminal over WebSockets
//!
//! Each session identifier names one PTY-backed process. Clients attach
//! through `/ws/{id}` (read-write) or `/ws-ro/{id}` (read-only); every client
//! of a session sees the same output stream, and read-write clients' input
//! is written to the shared PTY.

pub mod api;
pub mod config;
pub mod protocol;
pub mod pty;
pub mod session;
