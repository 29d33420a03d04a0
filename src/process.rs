//! Process entities
//!
//! A `ProcessEntry` is the engine's view of one guest process, keyed by
//! its address-space id. Identity resolution is frequently late (the
//! process is first observed mid-load), so entries carry an explicit
//! two-state lifecycle instead of trusting the first name they see.

use tracing::warn;

use crate::fd_table::FdTable;
use crate::introspect::ProcessSnapshot;
use crate::pending::PendingSyscall;
use crate::syscalls::SYSCALL_MAX_ARGS;

/// Identity lifecycle: one forward transition, `Fresh` -> `Resolved`.
///
/// `Fresh` holds whatever name the directory probe returned at creation
/// time; it may be a loader placeholder and is marked as unresolved in
/// output labels until an authoritative name arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Fresh { name: String },
    Resolved { name: String },
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Identity::Fresh { name } | Identity::Resolved { name } => name,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Identity::Fresh { .. })
    }
}

/// Marker appended to the label of a process that never resolved.
pub const FRESH_MARKER: &str = "*";

/// One tracked process: identity, descriptor table, in-flight syscall.
#[derive(Debug)]
pub struct ProcessEntry {
    asid: u64,
    pid: i32,
    ppid: i32,
    identity: Identity,
    started_ts: u64,
    ended_ts: Option<u64>,
    files: FdTable,
    pending: Option<PendingSyscall>,
    /// Whether the process-start record has been emitted.
    start_logged: bool,
    syscalls_completed: u64,
}

impl ProcessEntry {
    pub fn new(snapshot: ProcessSnapshot, now: u64) -> Self {
        let files = FdTable::new(snapshot.pid);
        Self {
            asid: snapshot.asid,
            pid: snapshot.pid,
            ppid: snapshot.ppid,
            identity: Identity::Fresh { name: snapshot.name },
            started_ts: now,
            ended_ts: None,
            files,
            pending: None,
            start_logged: false,
            syscalls_completed: 0,
        }
    }

    pub fn asid(&self) -> u64 {
        self.asid
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn ppid(&self) -> i32 {
        self.ppid
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn started_ts(&self) -> u64 {
        self.started_ts
    }

    pub fn ended_ts(&self) -> Option<u64> {
        self.ended_ts
    }

    pub fn files(&self) -> &FdTable {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FdTable {
        &mut self.files
    }

    pub fn syscalls_completed(&self) -> u64 {
        self.syscalls_completed
    }

    pub fn start_logged(&self) -> bool {
        self.start_logged
    }

    pub fn mark_start_logged(&mut self) {
        self.start_logged = true;
    }

    pub fn note_syscall_completed(&mut self) {
        self.syscalls_completed += 1;
    }

    /// Output label: `name~pid`, with a trailing marker while unresolved.
    pub fn label(&self) -> String {
        let marker = if self.identity.is_fresh() {
            FRESH_MARKER
        } else {
            ""
        };
        format!("{}~{}{}", self.identity.name(), self.pid, marker)
    }

    /// Adopt the authoritative name. Only the first call transitions;
    /// later calls are no-ops, the lifecycle never goes backwards.
    pub fn resolve(&mut self, name: impl Into<String>) {
        if self.identity.is_fresh() {
            self.identity = Identity::Resolved { name: name.into() };
        }
    }

    /// Attach a new in-flight syscall.
    ///
    /// A still-pending one means its exit event was lost (signal, missed
    /// boundary); warn and discard it, the new snapshot wins.
    pub fn begin_syscall(&mut self, nr: i64, args: [u64; SYSCALL_MAX_ARGS], now: u64) {
        if let Some(stale) = self.pending.take() {
            warn!(
                process = %self.label(),
                stale_nr = stale.nr(),
                pending_since = stale.entered_at(),
                new_nr = nr,
                "syscall was pending when a new one started; discarding stale"
            );
        }
        self.pending = Some(PendingSyscall::new(nr, args, now));
    }

    /// Detach the in-flight syscall, if any. `None` is expected at trace
    /// start, when exits outnumber observed entries.
    pub fn take_pending(&mut self) -> Option<PendingSyscall> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Stamp the termination pseudo-time. Called once, at teardown.
    pub fn mark_ended(&mut self, now: u64) {
        self.ended_ts = Some(now);
    }
}
