//! Recorded-trace replay harness
//!
//! The engine normally sits behind a live instruction monitor. For
//! offline analysis (and for the integration tests) the same engine is
//! driven from a recorded event stream: one JSON object per line, in
//! guest-execution order. The replay implementations of the collaborator
//! traits are fed from the stream itself.
//!
//! ```text
//! {"event":"proc","asid":4096,"pid":7,"ppid":1,"name":"sh"}
//! {"event":"mem","addr":8192,"data":"2f6574632f686f73747300"}
//! {"event":"enter","asid":4096,"regs":[5,8192,0,0,0,0,0,0]}
//! {"event":"exit","asid":4096,"ret":3}
//! {"event":"end","asid":4096}
//! ```

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::Engine;
use crate::introspect::{MemoryAccessor, MemoryError, ProcessDirectory, ProcessSnapshot};
use crate::syscalls::RegisterSnapshot;

/// One event of a recorded trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TraceEvent {
    /// The process directory's view of the currently running process.
    Proc {
        asid: u64,
        pid: i32,
        ppid: i32,
        name: String,
    },
    /// Authoritative identity became known for an address space.
    Resolve { asid: u64, name: String },
    /// Guest memory contents at `addr`, hex-encoded.
    Mem { addr: u64, data: String },
    /// Advance the pseudo-clock by `n` units.
    Tick { n: u64 },
    /// Syscall entry with the raw register snapshot.
    Enter { asid: u64, regs: Vec<u64> },
    /// Syscall exit with the return value.
    Exit { asid: u64, ret: i64 },
    /// Process termination.
    End { asid: u64 },
}

/// Directory fed by `proc` events.
#[derive(Debug, Default)]
pub struct ReplayDirectory {
    current: Option<ProcessSnapshot>,
}

impl ReplayDirectory {
    pub fn set_current(&mut self, snapshot: ProcessSnapshot) {
        self.current = Some(snapshot);
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

impl ProcessDirectory for ReplayDirectory {
    fn current_process(&self) -> Option<ProcessSnapshot> {
        self.current.clone()
    }
}

/// Guest memory image fed by `mem` events; regions keyed by base address.
#[derive(Debug, Default)]
pub struct ReplayMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl ReplayMemory {
    pub fn load(&mut self, addr: u64, data: Vec<u8>) {
        self.regions.insert(addr, data);
    }
}

impl MemoryAccessor for ReplayMemory {
    fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
        // Last region starting at or below addr, if it covers addr.
        let (base, data) = self
            .regions
            .range(..=addr)
            .next_back()
            .ok_or(MemoryError::Unmapped { addr })?;
        let off = (addr - base) as usize;
        if off >= data.len() {
            return Err(MemoryError::Unmapped { addr });
        }
        let end = (off + len).min(data.len());
        Ok(data[off..end].to_vec())
    }
}

/// Counters reported after a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: u64,
    pub skipped: u64,
    pub records: u64,
}

/// Feed a recorded trace into the engine and flush it at the end.
///
/// A malformed line is a steady-state defect of the recording, not of the
/// replay: it is logged and skipped, the trace continues. Only I/O errors
/// on the input are fatal.
pub fn run<R: BufRead, W: Write>(
    reader: R,
    mut engine: Engine<ReplayDirectory, ReplayMemory, W>,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read trace line {}", lineno + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: TraceEvent = match serde_json::from_str(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "malformed trace event; skipping");
                summary.skipped += 1;
                continue;
            }
        };
        summary.events += 1;
        apply(&mut engine, event, lineno + 1, &mut summary)?;
    }

    let log = engine.finish()?;
    summary.records = log.records_written();
    Ok(summary)
}

fn apply<W: Write>(
    engine: &mut Engine<ReplayDirectory, ReplayMemory, W>,
    event: TraceEvent,
    lineno: usize,
    summary: &mut ReplaySummary,
) -> Result<()> {
    match event {
        TraceEvent::Proc {
            asid,
            pid,
            ppid,
            name,
        } => {
            engine.directory_mut().set_current(ProcessSnapshot {
                asid,
                pid,
                ppid,
                name,
            });
        }
        TraceEvent::Resolve { asid, name } => engine.on_process_resolved(asid, &name),
        TraceEvent::Mem { addr, data } => match hex::decode(&data) {
            Ok(bytes) => engine.memory_mut().load(addr, bytes),
            Err(e) => {
                warn!(line = lineno, error = %e, "bad hex in mem event; skipping");
                summary.skipped += 1;
            }
        },
        TraceEvent::Tick { n } => engine.advance_clock(n),
        TraceEvent::Enter { asid, regs } => {
            let mut snapshot = RegisterSnapshot::default();
            for (slot, value) in snapshot.regs.iter_mut().zip(regs) {
                *slot = value;
            }
            engine.on_syscall_entry(asid, &snapshot)?;
        }
        TraceEvent::Exit { asid, ret } => engine.on_syscall_exit(asid, ret)?,
        TraceEvent::End { asid } => engine.on_process_exit(asid)?,
    }
    Ok(())
}
