//! Raw provenance log format
//!
//! One record per line, colon-delimited fields:
//!
//! ```text
//! x:<asid>:<label>                              process start
//! q:<asid>:<label>:<started_ts>:<ended_ts>      process end
//! g:<asid>:<label>:<escaped_filename>:<bytes>   file generated by process
//! u:<asid>:<label>:<escaped_filename>:<bytes>   file used by process
//! d:<escaped_filename_1>:<escaped_filename_2>   file_1 derived-from file_2
//! #<free text>                                  non-semantic comment
//! ```
//!
//! Escaping of file names happens upstream (`FileInfo::escaped`); this
//! module only lays out fields.

use std::fmt;
use std::io::{self, BufWriter, Write};

/// One line of the raw provenance log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvRecord {
    /// `x`: process started (identity became known or it did real work).
    Exec { asid: u64, label: String },
    /// `q`: process ended.
    Quit {
        asid: u64,
        label: String,
        started_ts: u64,
        ended_ts: u64,
    },
    /// `g`: process generated file content.
    Generated {
        asid: u64,
        label: String,
        file: String,
        bytes: u64,
    },
    /// `u`: process used file content.
    Used {
        asid: u64,
        label: String,
        file: String,
        bytes: u64,
    },
    /// `d`: first file derived from second.
    Derived { from: String, to: String },
    /// `#`: non-semantic annotation.
    Comment(String),
}

impl fmt::Display for ProvRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvRecord::Exec { asid, label } => write!(f, "x:{asid}:{label}"),
            ProvRecord::Quit {
                asid,
                label,
                started_ts,
                ended_ts,
            } => write!(f, "q:{asid}:{label}:{started_ts}:{ended_ts}"),
            ProvRecord::Generated {
                asid,
                label,
                file,
                bytes,
            } => write!(f, "g:{asid}:{label}:{file}:{bytes}"),
            ProvRecord::Used {
                asid,
                label,
                file,
                bytes,
            } => write!(f, "u:{asid}:{label}:{file}:{bytes}"),
            ProvRecord::Derived { from, to } => write!(f, "d:{from}:{to}"),
            ProvRecord::Comment(text) => write!(f, "#{text}"),
        }
    }
}

/// Append-only writer for the raw provenance stream.
///
/// Buffered; the hot path appends, `flush` is for teardown.
#[derive(Debug)]
pub struct ProvLog<W: Write> {
    out: BufWriter<W>,
    records_written: u64,
}

impl<W: Write> ProvLog<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            records_written: 0,
        }
    }

    pub fn record(&mut self, rec: &ProvRecord) -> io::Result<()> {
        writeln!(self.out, "{rec}")?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Unwrap the inner writer, flushing first. Test helper mostly.
    pub fn into_inner(self) -> io::Result<W> {
        self.out.into_inner().map_err(|e| e.into_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layouts() {
        let cases = [
            (
                ProvRecord::Exec {
                    asid: 10,
                    label: "cat~42".into(),
                },
                "x:10:cat~42",
            ),
            (
                ProvRecord::Quit {
                    asid: 10,
                    label: "cat~42".into(),
                    started_ts: 3,
                    ended_ts: 99,
                },
                "q:10:cat~42:3:99",
            ),
            (
                ProvRecord::Generated {
                    asid: 10,
                    label: "cat~42".into(),
                    file: "/tmp/out".into(),
                    bytes: 100,
                },
                "g:10:cat~42:/tmp/out:100",
            ),
            (
                ProvRecord::Used {
                    asid: 10,
                    label: "cat~42".into(),
                    file: "/etc/hosts".into(),
                    bytes: 50,
                },
                "u:10:cat~42:/etc/hosts:50",
            ),
            (
                ProvRecord::Derived {
                    from: "/tmp/out".into(),
                    to: "/etc/hosts".into(),
                },
                "d:/tmp/out:/etc/hosts",
            ),
            (ProvRecord::Comment("note".into()), "#note"),
        ];
        for (rec, expected) in cases {
            assert_eq!(rec.to_string(), expected);
        }
    }

    #[test]
    fn test_log_appends_lines() {
        let mut log = ProvLog::new(Vec::new());
        log.record(&ProvRecord::Comment("a".into())).unwrap();
        log.record(&ProvRecord::Comment("b".into())).unwrap();
        assert_eq!(log.records_written(), 2);
        let buf = log.into_inner().unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "#a\n#b\n");
    }
}
