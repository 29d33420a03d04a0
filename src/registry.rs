//! asid-keyed process registry
//!
//! Single owner of all live `ProcessEntry` values. Entries are created
//! lazily on the first attributable event for an address space and leave
//! the registry exactly once, through `remove` or the end-of-trace drain;
//! the caller must run the provenance emitter on every detached entry.

use fnv::FnvHashMap;
use tracing::debug;

use crate::introspect::ProcessDirectory;
use crate::process::ProcessEntry;

#[derive(Debug, Default)]
pub struct ProcessRegistry {
    map: FnvHashMap<u64, ProcessEntry>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, asid: u64) -> Option<&ProcessEntry> {
        self.map.get(&asid)
    }

    pub fn get_mut(&mut self, asid: u64) -> Option<&mut ProcessEntry> {
        self.map.get_mut(&asid)
    }

    /// Existing entry for `asid`, or a fresh one built from the directory's
    /// current-process probe. `None` when the probe fails: the event cannot
    /// be attributed yet and the caller skips it.
    pub fn get_or_create<D: ProcessDirectory>(
        &mut self,
        asid: u64,
        directory: &D,
        now: u64,
    ) -> Option<&mut ProcessEntry> {
        if !self.map.contains_key(&asid) {
            let snapshot = match directory.current_process() {
                Some(s) => s,
                None => {
                    debug!(asid, "process directory has no identity for asid; skipping");
                    return None;
                }
            };
            debug!(asid, pid = snapshot.pid, name = %snapshot.name, "tracking new process");
            self.map.insert(asid, ProcessEntry::new(snapshot, now));
        }
        self.map.get_mut(&asid)
    }

    /// Forward an authoritative name to the entry. Unknown asids and
    /// already-resolved entries are no-ops.
    pub fn resolve(&mut self, asid: u64, name: &str) {
        if let Some(entry) = self.map.get_mut(&asid) {
            entry.resolve(name);
        }
    }

    /// Detach the entry for `asid`.
    pub fn remove(&mut self, asid: u64) -> Option<ProcessEntry> {
        self.map.remove(&asid)
    }

    /// Detach everything, for the end-of-trace flush.
    pub fn drain(&mut self) -> Vec<ProcessEntry> {
        self.map.drain().map(|(_, entry)| entry).collect()
    }
}
