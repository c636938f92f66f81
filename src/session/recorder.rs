//! Best-effort reconstruction of submitted command lines from raw keystrokes.
//!
//! This models a naive line editor: printable bytes append, backspace/delete
//! erases one byte, carriage return submits. Cursor movement, history recall
//! and other escape sequences are not interpreted, so shells with their own
//! line editing can desynchronize the reconstructed line from what they
//! actually run.

const CARRIAGE_RETURN: u8 = b'\r';
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Whether a partially typed line is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Idle,
    Accumulating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keystroke {
    Submit,
    Erase,
    Append(u8),
    Ignore,
}

impl Keystroke {
    fn classify(byte: u8) -> Self {
        match byte {
            CARRIAGE_RETURN => Keystroke::Submit,
            BACKSPACE | DELETE => Keystroke::Erase,
            // Bytes >= 0x80 are kept so UTF-8 sequences survive.
            0x20..=0x7e | 0x80..=0xff => Keystroke::Append(byte),
            _ => Keystroke::Ignore,
        }
    }
}

/// In-progress line plus the append-only log of submitted commands.
#[derive(Debug, Default)]
pub struct LineRecorder {
    buffer: Vec<u8>,
    log: Vec<String>,
}

impl LineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw input bytes, returning the commands submitted by this chunk.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut submitted = Vec::new();
        for &byte in data {
            match Keystroke::classify(byte) {
                Keystroke::Submit => {
                    if !self.buffer.is_empty() {
                        let command = String::from_utf8_lossy(&self.buffer).into_owned();
                        self.buffer.clear();
                        self.log.push(command.clone());
                        submitted.push(command);
                    }
                }
                Keystroke::Erase => {
                    self.buffer.pop();
                }
                Keystroke::Append(b) => self.buffer.push(b),
                Keystroke::Ignore => {}
            }
        }
        submitted
    }

    pub fn state(&self) -> LineState {
        if self.buffer.is_empty() {
            LineState::Idle
        } else {
            LineState::Accumulating
        }
    }

    /// The line typed so far and not yet submitted.
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Submitted commands, oldest first.
    pub fn log(&self) -> &[String] {
        &self.log
    }
}
