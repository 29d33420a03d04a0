//! Per-process file descriptor table
//!
//! Maps live descriptors to their `FileInfo` accounting records and keeps
//! an append-only history of closed sessions. The history is what the
//! derivation pass walks at process teardown.

use fnv::FnvHashMap;
use tracing::warn;

use crate::file_info::{FileInfo, OpenFlags};

/// Direction of a data access on a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Descriptor table plus close history for one process.
///
/// Invariant: a descriptor key appears in the open map at most once; a
/// reopen atomically moves the stale record to history first.
#[derive(Debug)]
pub struct FdTable {
    /// Owner pid, used to synthesize placeholder names for inherited fds.
    pid: i32,
    open: FnvHashMap<i32, FileInfo>,
    history: Vec<FileInfo>,
}

impl FdTable {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            open: FnvHashMap::default(),
            history: Vec::new(),
        }
    }

    /// Install a new mapping for `fd`.
    ///
    /// A descriptor that is still mapped means its close was never
    /// observed; the stale record is force-moved to history with its
    /// counters intact.
    pub fn open(&mut self, fd: i32, info: FileInfo) {
        if let Some(stale) = self.open.remove(&fd) {
            warn!(
                fd,
                stale = %stale.name(),
                new = %info.name(),
                "fd already mapped; moving stale record to history"
            );
            self.history.push(stale);
        }
        self.open.insert(fd, info);
    }

    /// Move the mapping for `fd` to history. Unknown descriptors are
    /// tolerated: many closes refer to fds whose open was never observed.
    pub fn close(&mut self, fd: i32) {
        match self.open.remove(&fd) {
            Some(info) => self.history.push(info),
            None => warn!(fd, "close on unmapped fd; ignoring"),
        }
    }

    /// Account `count` bytes moving through `fd` at pseudo-time `now`.
    ///
    /// An unmapped descriptor was inherited from a parent whose open() we
    /// never saw; synthesize a record with heuristic flags: fd 0 read-only,
    /// fd 1/2 write-only, anything else read-only unless this access is a
    /// write (then read-write).
    pub fn access(&mut self, fd: i32, direction: Direction, count: u64, now: u64) {
        let pid = self.pid;
        let info = self.open.entry(fd).or_insert_with(|| {
            let name = placeholder_name(pid, fd);
            warn!(fd, %name, "no mapping for fd; synthesizing one");
            let flags = match fd {
                0 => OpenFlags::RDONLY,
                1 | 2 => OpenFlags::WRONLY,
                _ if direction == Direction::Write => OpenFlags::RDWR,
                _ => OpenFlags::RDONLY,
            };
            FileInfo::new(name, flags)
        });
        match direction {
            Direction::Read => info.inc_read(count, now),
            Direction::Write => info.inc_written(count, now),
        };
    }

    /// Move every still-open descriptor to history. Process exit closes
    /// all descriptors implicitly.
    pub fn finalize(&mut self) {
        self.history.extend(self.open.drain().map(|(_, info)| info));
    }

    pub fn get(&self, fd: i32) -> Option<&FileInfo> {
        self.open.get(&fd)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn history(&self) -> &[FileInfo] {
        &self.history
    }
}

/// Fallback file name when no real name can be resolved for a descriptor.
pub fn placeholder_name(pid: i32, fd: i32) -> String {
    format!("({pid}|fd{fd})")
}
