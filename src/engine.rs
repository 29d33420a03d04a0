//! Provenance engine
//!
//! The single process-wide context: registry, syscall table, ABI,
//! pseudo-clock, collaborators and the output log. Event dispatch is
//! synchronous and single-threaded; callers with multiple execution
//! contexts must serialize events into one ordered stream first.

use std::io::Write;

use anyhow::Result;
use tracing::{debug, trace};

use crate::emitter;
use crate::fd_table::{placeholder_name, Direction};
use crate::file_info::{FileInfo, OpenFlags};
use crate::introspect::{MemoryAccessor, ProcessDirectory};
use crate::pending::{PendingSyscall, SyscallArg};
use crate::process::ProcessEntry;
use crate::prov_log::{ProvLog, ProvRecord};
use crate::registry::ProcessRegistry;
use crate::syscalls::{
    RegisterSnapshot, SyscallAbi, SyscallClass, SyscallTable, STR_SAMPLE_LEN,
};

/// Provenance-derivation engine over a syscall-boundary event stream.
pub struct Engine<D, M, W, A = crate::syscalls::I386Abi>
where
    D: ProcessDirectory,
    M: MemoryAccessor,
    W: Write,
    A: SyscallAbi,
{
    registry: ProcessRegistry,
    table: SyscallTable,
    abi: A,
    directory: D,
    memory: M,
    log: ProvLog<W>,
    /// Monotonic pseudo-timestamp; instruction counter, not wall clock.
    clock: u64,
}

impl<D, M, W, A> Engine<D, M, W, A>
where
    D: ProcessDirectory,
    M: MemoryAccessor,
    W: Write,
    A: SyscallAbi,
{
    pub fn with_abi(table: SyscallTable, abi: A, directory: D, memory: M, out: W) -> Self {
        Self {
            registry: ProcessRegistry::new(),
            table,
            abi,
            directory,
            memory,
            log: ProvLog::new(out),
            clock: 0,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock
    }

    /// Advance the pseudo-clock by `n` units of traced execution.
    pub fn advance_clock(&mut self, n: u64) {
        self.clock += n;
    }

    pub fn tracked_processes(&self) -> usize {
        self.registry.len()
    }

    pub fn directory_mut(&mut self) -> &mut D {
        &mut self.directory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Syscall-entry boundary for the process running in `asid`.
    pub fn on_syscall_entry(&mut self, asid: u64, regs: &RegisterSnapshot) -> Result<()> {
        self.clock += 1;
        let now = self.clock;
        let nr = self.abi.syscall_number(regs);
        let args = self.abi.args(regs);
        let Some(entry) = self.registry.get_or_create(asid, &self.directory, now) else {
            return Ok(()); // cannot attribute yet
        };
        trace!(asid, nr, name = self.table.lookup(nr).name, "syscall entry");
        entry.begin_syscall(nr, args, now);
        Ok(())
    }

    /// Syscall-exit boundary: pair with the pending entry and dispatch by
    /// class. A missing pending syscall is expected at trace start.
    pub fn on_syscall_exit(&mut self, asid: u64, rval: i64) -> Result<()> {
        self.clock += 1;
        let now = self.clock;
        let Some(entry) = self.registry.get_or_create(asid, &self.directory, now) else {
            return Ok(());
        };
        let Some(pending) = entry.take_pending() else {
            debug!(process = %entry.label(), "unknown syscall completed");
            return Ok(());
        };

        entry.note_syscall_completed();
        let spec = self.table.lookup(pending.nr());
        trace!(asid, name = spec.name, rval, "syscall exit");

        // Stream the start record the first time a resolved process
        // completes a syscall: the name is authoritative by then, and
        // processes that never enter the kernel stay out of the log.
        if !entry.start_logged() && !entry.identity().is_fresh() {
            let rec = ProvRecord::Exec {
                asid,
                label: entry.label(),
            };
            self.log.record(&rec)?;
            entry.mark_start_logged();
        }

        match spec.class {
            SyscallClass::Open => {
                Self::handle_open(&self.table, &self.memory, entry, &pending, rval, now);
            }
            SyscallClass::Close => {
                Self::handle_close(&self.table, &self.memory, entry, &pending, rval);
            }
            SyscallClass::Read => {
                Self::handle_access(
                    &self.table,
                    &self.memory,
                    entry,
                    &pending,
                    rval,
                    Direction::Read,
                    now,
                );
            }
            SyscallClass::Write => {
                Self::handle_access(
                    &self.table,
                    &self.memory,
                    entry,
                    &pending,
                    rval,
                    Direction::Write,
                    now,
                );
            }
            SyscallClass::Link | SyscallClass::Rename => {
                self.handle_link(asid, rval, &pending)?;
            }
            SyscallClass::Other => {
                trace!(name = spec.name, "other syscall; no accounting");
            }
        }
        Ok(())
    }

    /// Install a new descriptor mapping from a successful open.
    fn handle_open(
        table: &SyscallTable,
        memory: &M,
        entry: &mut ProcessEntry,
        pending: &PendingSyscall,
        rval: i64,
        _now: u64,
    ) {
        if rval < 0 {
            return;
        }
        let fd = rval as i32;
        let name = match pending.decode_arg(table, memory, 0, STR_SAMPLE_LEN) {
            SyscallArg::Str(s) if s != crate::introspect::FAULT_PLACEHOLDER => s,
            // Unreadable filename argument degrades to the placeholder.
            _ => placeholder_name(entry.pid(), fd),
        };
        // creat(2) carries a mode, not flags; its flags are implied.
        let flags = if table.lookup(pending.nr()).name == "creat" {
            OpenFlags(libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC)
        } else {
            match pending.decode_arg(table, memory, 1, 0) {
                SyscallArg::Int(v) => OpenFlags(v as i32),
                _ => OpenFlags::RDONLY,
            }
        };
        entry.files_mut().open(fd, FileInfo::new(name, flags));
    }

    fn handle_close(
        table: &SyscallTable,
        memory: &M,
        entry: &mut ProcessEntry,
        pending: &PendingSyscall,
        rval: i64,
    ) {
        if rval < 0 {
            return;
        }
        if let SyscallArg::Int(fd) = pending.decode_arg(table, memory, 0, 0) {
            entry.files_mut().close(fd as i32);
        }
    }

    /// Byte accounting for a successful read or write.
    fn handle_access(
        table: &SyscallTable,
        memory: &M,
        entry: &mut ProcessEntry,
        pending: &PendingSyscall,
        rval: i64,
        direction: Direction,
        now: u64,
    ) {
        if rval <= 0 {
            return;
        }
        if let SyscallArg::Int(fd) = pending.decode_arg(table, memory, 0, 0) {
            entry
                .files_mut()
                .access(fd as i32, direction, rval as u64, now);
        }
    }

    /// link/rename: the new path derives from the old one immediately; no
    /// descriptor state is involved.
    fn handle_link(&mut self, asid: u64, rval: i64, pending: &PendingSyscall) -> Result<()> {
        if rval < 0 {
            return Ok(());
        }
        let decode = |idx: usize| match pending.decode_arg(&self.table, &self.memory, idx, STR_SAMPLE_LEN)
        {
            SyscallArg::Str(s) => s,
            _ => crate::introspect::FAULT_PLACEHOLDER.to_string(),
        };
        let oldpath = FileInfo::new(decode(0), OpenFlags(0));
        let newpath = FileInfo::new(decode(1), OpenFlags(0));

        let label = self
            .registry
            .get(asid)
            .map(|e| e.label())
            .unwrap_or_default();
        self.log.record(&ProvRecord::Derived {
            from: newpath.escaped().to_string(),
            to: oldpath.escaped().to_string(),
        })?;
        self.log.record(&ProvRecord::Generated {
            asid,
            label,
            file: newpath.escaped().to_string(),
            bytes: 0,
        })?;
        Ok(())
    }

    /// Authoritative identity arrived for `asid`.
    pub fn on_process_resolved(&mut self, asid: u64, name: &str) {
        self.registry.resolve(asid, name);
    }

    /// Explicit termination: detach the entry and run the derivation pass.
    /// Any still-pending syscall is silently dropped with it.
    pub fn on_process_exit(&mut self, asid: u64) -> Result<()> {
        self.clock += 1;
        match self.registry.remove(asid) {
            Some(entry) => {
                debug!(asid, process = %entry.label(), "process exit; emitting provenance");
                emitter::emit_teardown(entry, self.clock, &mut self.log)?;
            }
            None => debug!(asid, "exit for untracked asid; ignoring"),
        }
        Ok(())
    }

    /// End-of-trace flush: tear down every remaining process, then flush
    /// the output stream. Consumes the engine.
    pub fn finish(mut self) -> Result<ProvLog<W>> {
        let remaining = self.registry.drain();
        let now = self.clock;
        for entry in remaining {
            debug!(asid = entry.asid(), process = %entry.label(), "flushing at end of trace");
            emitter::emit_teardown(entry, now, &mut self.log)?;
        }
        self.log.flush()?;
        Ok(self.log)
    }
}

impl<D, M, W> Engine<D, M, W>
where
    D: ProcessDirectory,
    M: MemoryAccessor,
    W: Write,
{
    /// Engine with the default table and ABI (classic Linux i386).
    pub fn new(directory: D, memory: M, out: W) -> Self {
        Self::with_abi(
            SyscallTable::linux_i386(),
            crate::syscalls::I386Abi,
            directory,
            memory,
            out,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{MemoryError, ProcessSnapshot};
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestDirectory {
        current: Option<ProcessSnapshot>,
    }

    impl ProcessDirectory for TestDirectory {
        fn current_process(&self) -> Option<ProcessSnapshot> {
            self.current.clone()
        }
    }

    #[derive(Default)]
    struct TestMemory {
        strings: HashMap<u64, Vec<u8>>,
    }

    impl MemoryAccessor for TestMemory {
        fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
            let data = self
                .strings
                .get(&addr)
                .ok_or(MemoryError::Unmapped { addr })?;
            Ok(data[..data.len().min(len)].to_vec())
        }
    }

    const ASID: u64 = 0x1000;

    fn engine_with_process(name: &str) -> Engine<TestDirectory, TestMemory, Vec<u8>> {
        let directory = TestDirectory {
            current: Some(ProcessSnapshot {
                asid: ASID,
                pid: 7,
                ppid: 1,
                name: name.to_string(),
            }),
        };
        Engine::new(directory, TestMemory::default(), Vec::new())
    }

    fn seed_string(engine: &mut Engine<TestDirectory, TestMemory, Vec<u8>>, addr: u64, s: &str) {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        engine.memory_mut().strings.insert(addr, bytes);
    }

    fn enter(engine: &mut Engine<TestDirectory, TestMemory, Vec<u8>>, nr: u64, args: [u64; 3]) {
        let regs = RegisterSnapshot::new([nr, args[0], args[1], args[2], 0, 0, 0, 0]);
        engine.on_syscall_entry(ASID, &regs).unwrap();
    }

    fn output(engine: Engine<TestDirectory, TestMemory, Vec<u8>>) -> Vec<String> {
        let buf = engine.finish().unwrap().into_inner().unwrap();
        String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_open_read_close_accounting() {
        let mut engine = engine_with_process("cat");
        seed_string(&mut engine, 0x2000, "/etc/hosts");

        enter(&mut engine, 5, [0x2000, libc::O_RDONLY as u64, 0]);
        engine.on_process_resolved(ASID, "cat");
        engine.on_syscall_exit(ASID, 3).unwrap(); // open -> fd 3
        enter(&mut engine, 3, [3, 0x9000, 64]);
        engine.on_syscall_exit(ASID, 64).unwrap(); // read 64 bytes
        enter(&mut engine, 6, [3, 0, 0]);
        engine.on_syscall_exit(ASID, 0).unwrap(); // close

        let out = output(engine);
        assert!(out.iter().any(|l| l.starts_with("x:4096:cat~7")));
        assert!(out.iter().any(|l| l == "u:4096:cat~7:/etc/hosts:64"));
    }

    #[test]
    fn test_failed_open_installs_nothing() {
        let mut engine = engine_with_process("cat");
        seed_string(&mut engine, 0x2000, "/etc/shadow");
        enter(&mut engine, 5, [0x2000, libc::O_RDONLY as u64, 0]);
        engine.on_syscall_exit(ASID, -13).unwrap(); // EACCES
        let out = output(engine);
        assert!(!out.iter().any(|l| l.contains("/etc/shadow")));
    }

    #[test]
    fn test_open_with_unreadable_name_uses_placeholder() {
        let mut engine = engine_with_process("cat");
        // 0x2000 deliberately not seeded
        enter(&mut engine, 5, [0x2000, libc::O_RDONLY as u64, 0]);
        engine.on_syscall_exit(ASID, 3).unwrap();
        enter(&mut engine, 3, [3, 0x9000, 16]);
        engine.on_syscall_exit(ASID, 16).unwrap();
        let out = output(engine);
        assert!(out.iter().any(|l| l.contains("(7|fd3)")));
    }

    #[test]
    fn test_exit_without_entry_is_tolerated() {
        let mut engine = engine_with_process("cat");
        engine.on_syscall_exit(ASID, 0).unwrap();
        assert_eq!(engine.tracked_processes(), 1);
    }

    #[test]
    fn test_unattributable_event_skipped() {
        let directory = TestDirectory { current: None };
        let mut engine = Engine::new(directory, TestMemory::default(), Vec::new());
        let regs = RegisterSnapshot::new([5, 0, 0, 0, 0, 0, 0, 0]);
        engine.on_syscall_entry(ASID, &regs).unwrap();
        assert_eq!(engine.tracked_processes(), 0);
    }

    #[test]
    fn test_overlapping_entries_keep_latest() {
        let mut engine = engine_with_process("cat");
        seed_string(&mut engine, 0x2000, "/tmp/x");
        enter(&mut engine, 3, [0, 0x9000, 64]); // read entry, exit lost
        enter(&mut engine, 5, [0x2000, libc::O_WRONLY as u64, 0]);
        engine.on_syscall_exit(ASID, 4).unwrap(); // pairs with the open
        enter(&mut engine, 4, [4, 0x9000, 8]);
        engine.on_syscall_exit(ASID, 8).unwrap();
        let out = output(engine);
        assert!(out.iter().any(|l| l == "g:4096:cat~7*:/tmp/x:8"));
    }

    #[test]
    fn test_rename_emits_immediate_derivation() {
        let mut engine = engine_with_process("mv");
        seed_string(&mut engine, 0x2000, "/tmp/old");
        seed_string(&mut engine, 0x3000, "/tmp/new");
        enter(&mut engine, 38, [0x2000, 0x3000, 0]);
        engine.on_process_resolved(ASID, "mv");
        engine.on_syscall_exit(ASID, 0).unwrap();
        let out = output(engine);
        assert!(out.iter().any(|l| l == "d:/tmp/new:/tmp/old"));
        assert!(out.iter().any(|l| l.starts_with("g:4096:mv~7:/tmp/new:0")));
    }

    #[test]
    fn test_process_exit_runs_derivation_once() {
        let mut engine = engine_with_process("job");
        seed_string(&mut engine, 0x2000, "/in");
        seed_string(&mut engine, 0x3000, "/out");

        enter(&mut engine, 5, [0x2000, libc::O_RDONLY as u64, 0]);
        engine.on_process_resolved(ASID, "job");
        engine.on_syscall_exit(ASID, 3).unwrap();
        enter(&mut engine, 3, [3, 0x9000, 50]);
        engine.on_syscall_exit(ASID, 50).unwrap();
        enter(&mut engine, 5, [0x3000, (libc::O_WRONLY | libc::O_TRUNC) as u64, 0]);
        engine.on_syscall_exit(ASID, 4).unwrap();
        enter(&mut engine, 4, [4, 0x9000, 100]);
        engine.on_syscall_exit(ASID, 100).unwrap();

        engine.on_process_exit(ASID).unwrap();
        assert_eq!(engine.tracked_processes(), 0);
        // Second exit for the same asid is a no-op.
        engine.on_process_exit(ASID).unwrap();

        let out = output(engine);
        let derived: Vec<_> = out.iter().filter(|l| l.starts_with("d:")).collect();
        assert_eq!(derived, vec!["d:/out:/in"]);
        let quits = out.iter().filter(|l| l.starts_with("q:")).count();
        assert_eq!(quits, 1);
    }

    #[test]
    fn test_inherited_stdout_write() {
        let mut engine = engine_with_process("echo");
        engine.on_process_resolved(ASID, "echo");
        enter(&mut engine, 4, [1, 0x9000, 12]); // write to fd 1, no open
        engine.on_syscall_exit(ASID, 12).unwrap();
        let out = output(engine);
        assert!(out.iter().any(|l| l.starts_with("g:") && l.contains("(7|fd1)")));
    }

    #[test]
    fn test_clock_advances_per_event() {
        let mut engine = engine_with_process("p");
        let t0 = engine.now();
        enter(&mut engine, 3, [0, 0, 0]);
        engine.on_syscall_exit(ASID, 0).unwrap();
        assert_eq!(engine.now(), t0 + 2);
        engine.advance_clock(100);
        assert_eq!(engine.now(), t0 + 102);
    }
}
