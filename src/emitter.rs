//! Provenance emitter
//!
//! Runs exactly once per process, at teardown, over the file history the
//! descriptor table accumulated. Produces the process-to-file edges, the
//! pairwise file-to-file derivation edges, and the lifecycle records.

use std::io::{self, Write};

use tracing::info;

use crate::file_info::{FileClass, FileInfo};
use crate::process::ProcessEntry;
use crate::prov_log::{ProvLog, ProvRecord};

/// Emit all teardown records for a process being destroyed.
///
/// The entry must already be detached from the registry; it is consumed
/// here, so the pass cannot run twice for the same process.
pub fn emit_teardown<W: Write>(
    mut entry: ProcessEntry,
    now: u64,
    log: &mut ProvLog<W>,
) -> io::Result<()> {
    entry.mark_ended(now);
    // Process exit implicitly closes every descriptor.
    entry.files_mut().finalize();

    let asid = entry.asid();
    let label = entry.label();
    let history = entry.files().history();

    for f in history {
        emit_process_file(asid, &label, f, log)?;
        emit_derivations(f, history, log)?;
    }

    // Start record: only for processes that resolved identity (already
    // streamed in that case) or did at least one syscall; transient
    // never-identified address spaces stay out of the log.
    if !entry.start_logged() && entry.syscalls_completed() > 0 {
        log.record(&ProvRecord::Exec {
            asid,
            label: label.clone(),
        })?;
    }

    // End record always, with whatever label is available.
    log.record(&ProvRecord::Quit {
        asid,
        label,
        started_ts: entry.started_ts(),
        ended_ts: now,
    })?;
    Ok(())
}

fn emit_process_file<W: Write>(
    asid: u64,
    label: &str,
    f: &FileInfo,
    log: &mut ProvLog<W>,
) -> io::Result<()> {
    let rec = match f.classify() {
        FileClass::Generated => ProvRecord::Generated {
            asid,
            label: label.to_string(),
            file: f.escaped().to_string(),
            bytes: f.written(),
        },
        FileClass::Used => ProvRecord::Used {
            asid,
            label: label.to_string(),
            file: f.escaped().to_string(),
            bytes: f.read(),
        },
        // Neither read nor written: annotate, for trace completeness.
        FileClass::Untouched => {
            ProvRecord::Comment(format!("n:{}:{}:{}", asid, label, f.escaped()))
        }
    };
    log.record(&rec)
}

/// Pairwise derivation edges from `f` to every other file in the history.
///
/// An edge asserts that content written to `f` after content was read from
/// `g` may have incorporated `g`'s data; the inequality is strict, ties
/// and reversed orderings are not evidence. Deliberately not transitively
/// closed, and quadratic in the per-process file count, which stays small
/// in practice.
fn emit_derivations<W: Write>(
    f: &FileInfo,
    history: &[FileInfo],
    log: &mut ProvLog<W>,
) -> io::Result<()> {
    let fw = f.flags().writable() && f.written() > 0;
    if !fw {
        return Ok(());
    }
    let Some(write_ts) = f.last_write_ts() else {
        return Ok(());
    };

    for g in history {
        if std::ptr::eq(f, g) {
            continue; // no self-derivation edges
        }
        let gr = g.flags().readable() && g.read() > 0;
        let Some(read_ts) = g.first_read_ts() else {
            continue;
        };
        if gr && write_ts > read_ts {
            info!(
                from = %f.name(),
                write_ts,
                to = %g.name(),
                read_ts,
                "derivation edge"
            );
            log.record(&ProvRecord::Derived {
                from: f.escaped().to_string(),
                to: g.escaped().to_string(),
            })?;
        }
    }
    Ok(())
}
