//! Introspection collaborator boundary
//!
//! The engine never touches the execution environment directly. Identity
//! of the currently running process and guest memory reads both come
//! through these traits; the replay harness and the test doubles are the
//! in-tree implementations.

use thiserror::Error;

/// Owned snapshot of a process's identity, as reported by the directory.
///
/// Value semantics: ownership transfers to the caller once; nothing
/// aliases back into the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub asid: u64,
    pub pid: i32,
    pub ppid: i32,
    pub name: String,
}

/// Resolves the identity of the process currently executing.
///
/// `None` means the directory cannot attribute the current context yet
/// (e.g. mid-load, before the loader finishes); the caller skips the
/// event rather than inventing an entity.
pub trait ProcessDirectory {
    fn current_process(&self) -> Option<ProcessSnapshot>;
}

/// Guest memory read failure.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("unmapped guest address {addr:#x}")]
    Unmapped { addr: u64 },
    #[error("short read at {addr:#x}: wanted {wanted}, got {got}")]
    Short { addr: u64, wanted: usize, got: usize },
}

/// Placeholder reported when a string argument cannot be read at all.
pub const FAULT_PLACEHOLDER: &str = "<fault>";

/// Reads bytes out of the instrumented environment's memory.
pub trait MemoryAccessor {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError>;

    /// Best-effort text at `addr`, capped at `max` bytes and never assumed
    /// NUL-terminated within that bound.
    ///
    /// A properly terminated printable prefix comes back verbatim; a
    /// non-printable tail is hex-dumped; a read failure yields the fault
    /// placeholder. One unreadable argument must never fail a syscall.
    fn read_bounded_string(&self, addr: u64, max: usize) -> String {
        let bytes = match self.read_bytes(addr, max) {
            Ok(bytes) => bytes,
            Err(_) => return FAULT_PLACEHOLDER.to_string(),
        };

        // Printable prefix up to NUL or the first binary byte.
        let mut end = 0;
        while end < bytes.len() && bytes[end] != 0 && is_printable(bytes[end]) {
            end += 1;
        }
        let prefix = String::from_utf8_lossy(&bytes[..end]).into_owned();

        if end == bytes.len() || bytes[end] == 0 {
            // Terminated, or printable all the way to the read bound.
            prefix
        } else if end == 0 {
            format!("<bin:{}>", hex::encode(&bytes[..bytes.len().min(16)]))
        } else {
            format!("{prefix}<bin:{}>", hex::encode(&bytes[end..bytes.len().min(end + 16)]))
        }
    }
}

fn is_printable(b: u8) -> bool {
    (0x20..0x7f).contains(&b)
}
