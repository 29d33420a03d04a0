//! Per-open-session file accounting
//!
//! One `FileInfo` exists per observed open session of a file within a
//! process: byte counters for reads and writes, plus the pseudo-timestamps
//! the derivation rule compares at process teardown.

use std::fmt;

/// Raw open(2) flag bits with the predicates the classifier needs.
///
/// The accounting logic never inspects individual bits outside this type;
/// it asks `readable`/`writable`/`truncates` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub i32);

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags(libc::O_RDONLY);
    pub const WRONLY: OpenFlags = OpenFlags(libc::O_WRONLY);
    pub const RDWR: OpenFlags = OpenFlags(libc::O_RDWR);

    /// Open for writing: `O_WRONLY` or `O_RDWR`.
    pub fn writable(self) -> bool {
        (self.0 & libc::O_WRONLY) != 0 || (self.0 & libc::O_RDWR) != 0
    }

    /// Open for reading: anything that is not write-only.
    pub fn readable(self) -> bool {
        (self.0 & libc::O_WRONLY) == 0
    }

    /// Opened with a flag that replaces or creates content.
    ///
    /// A truncating/creating open classifies the file as generated even if
    /// no write was observed afterwards.
    pub fn truncates(self) -> bool {
        self.writable() && (self.0 & (libc::O_TRUNC | libc::O_CREAT)) != 0
    }
}

/// Process-to-file relation assigned to a file at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    /// Process created or rewrote the file content.
    Generated,
    /// Process read the file content.
    Used,
    /// Opened but neither read nor written; kept in the trace as a comment.
    Untouched,
}

/// Accounting record for one open session of a file.
///
/// Exclusively owned by either its process's open descriptor table or the
/// process's file history, never both.
#[derive(Debug, Clone)]
pub struct FileInfo {
    name: String,
    escaped: String,
    flags: OpenFlags,
    written: u64,
    read: u64,
    first_read_ts: Option<u64>,
    last_write_ts: Option<u64>,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, flags: OpenFlags) -> Self {
        let name = name.into();
        let escaped = escape_name(&name);
        Self {
            name,
            escaped,
            flags,
            written: 0,
            read: 0,
            first_read_ts: None,
            last_write_ts: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached escaped form of the name, for the raw provenance output only.
    /// Never used for equality or lookup.
    pub fn escaped(&self) -> &str {
        &self.escaped
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn read(&self) -> u64 {
        self.read
    }

    /// Pseudo-timestamp of the first successful read, if any read happened.
    pub fn first_read_ts(&self) -> Option<u64> {
        self.first_read_ts
    }

    /// Pseudo-timestamp of the most recent successful write.
    pub fn last_write_ts(&self) -> Option<u64> {
        self.last_write_ts
    }

    /// Add `n` read bytes. The first-read timestamp is latched once, on the
    /// 0 -> positive transition.
    pub fn inc_read(&mut self, n: u64, now: u64) -> u64 {
        if self.read == 0 {
            self.first_read_ts = Some(now);
        }
        self.read += n;
        self.read
    }

    /// Add `n` written bytes and advance the last-write timestamp.
    pub fn inc_written(&mut self, n: u64, now: u64) -> u64 {
        self.last_write_ts = Some(now);
        self.written += n;
        self.written
    }

    /// Classify the process-to-file relation for this session.
    pub fn classify(&self) -> FileClass {
        if self.flags.truncates() || (self.flags.writable() && self.written > 0) {
            FileClass::Generated
        } else if self.flags.readable() && self.read > 0 {
            FileClass::Used
        } else {
            FileClass::Untouched
        }
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(r{}:w{})", self.name, self.read, self.written)
    }
}

/// Percent-escape a file name for the colon-delimited provenance format.
///
/// Escaped characters: ASCII controls (tab included, since it is a
/// control byte), the `:` field separator, and non-blank whitespace.
/// Plain spaces pass through unchanged. Deterministic; same input, same
/// output.
pub fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let blank = c == ' ' || c == '\t';
        if c.is_ascii_control() || c == ':' || (c.is_ascii_whitespace() && !blank) {
            out.push('%');
            out.push_str(&format!("{:02x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}
