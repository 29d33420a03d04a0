//! Rastro - runtime provenance derivation from syscall-boundary traces
//!
//! Given an ordered stream of syscall entry/exit events for processes in
//! an instrumented execution environment, this library tracks process and
//! file entities, accounts per-file read/write bytes, and derives a
//! provenance graph ("process generated file", "process used file", "file
//! derived from file") emitted as an append-only log.

pub mod cli;
pub mod emitter;
pub mod engine;
pub mod fd_table;
pub mod file_info;
pub mod introspect;
pub mod pending;
pub mod process;
pub mod prov_log;
pub mod registry;
pub mod replay;
pub mod syscalls;
