//! In-flight syscall state
//!
//! A `PendingSyscall` is the raw snapshot taken at syscall entry: number
//! and argument slots, nothing decoded. Interpretation happens lazily at
//! exit, once the handler knows which arguments it cares about; string
//! arguments in particular cost a bounded guest memory read each.

use crate::introspect::MemoryAccessor;
use crate::syscalls::{ArgKind, SyscallTable, SYSCALL_MAX_ARGS};

/// A decoded syscall argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallArg {
    Int(i64),
    Ptr(u64),
    Bytes(Vec<u8>),
    Str(String),
    /// The memory accessor failed; the argument degrades, the syscall
    /// record does not.
    Fault,
}

/// Raw snapshot of a syscall taken at its entry boundary.
///
/// At most one exists per process; it is consumed exactly once at the
/// matching exit (or discarded on a protocol violation).
#[derive(Debug, Clone)]
pub struct PendingSyscall {
    nr: i64,
    args: [u64; SYSCALL_MAX_ARGS],
    entered_at: u64,
}

impl PendingSyscall {
    pub fn new(nr: i64, args: [u64; SYSCALL_MAX_ARGS], entered_at: u64) -> Self {
        Self { nr, args, entered_at }
    }

    pub fn nr(&self) -> i64 {
        self.nr
    }

    pub fn entered_at(&self) -> u64 {
        self.entered_at
    }

    /// Raw slot value, uninterpreted. `None` for slots beyond the
    /// captured set.
    pub fn raw_arg(&self, index: usize) -> Option<u64> {
        self.args.get(index).copied()
    }

    /// Decode argument `index` according to the table's declared shape.
    ///
    /// `size` selects between pointer-value (`0`) and pointed-to data
    /// (`> 0`); string arguments are scanned up to `size` bytes and are
    /// never assumed NUL-terminated within that bound.
    pub fn decode_arg<M: MemoryAccessor>(
        &self,
        table: &SyscallTable,
        memory: &M,
        index: usize,
        size: usize,
    ) -> SyscallArg {
        // Slots beyond the captured set degrade like any other bad
        // argument; they never fail the syscall record.
        let Some(raw) = self.raw_arg(index) else {
            return SyscallArg::Fault;
        };
        let spec = table.lookup(self.nr);
        let Some(kind) = spec.args.get(index) else {
            return SyscallArg::Int(raw as i64);
        };
        match kind {
            ArgKind::Int => SyscallArg::Int(raw as i32 as i64),
            ArgKind::Ptr => {
                if size == 0 {
                    SyscallArg::Ptr(raw)
                } else {
                    match memory.read_bytes(raw, size) {
                        Ok(bytes) => SyscallArg::Bytes(bytes),
                        Err(_) => SyscallArg::Fault,
                    }
                }
            }
            ArgKind::Str => SyscallArg::Str(memory.read_bounded_string(raw, size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{MemoryError, FAULT_PLACEHOLDER};

    struct NoMemory;
    impl MemoryAccessor for NoMemory {
        fn read_bytes(&self, addr: u64, _len: usize) -> Result<Vec<u8>, MemoryError> {
            Err(MemoryError::Unmapped { addr })
        }
    }

    struct StringMemory(&'static [u8]);
    impl MemoryAccessor for StringMemory {
        fn read_bytes(&self, _addr: u64, len: usize) -> Result<Vec<u8>, MemoryError> {
            Ok(self.0[..self.0.len().min(len)].to_vec())
        }
    }

    fn args(a: u64, b: u64, c: u64) -> [u64; SYSCALL_MAX_ARGS] {
        [a, b, c, 0, 0, 0]
    }

    #[test]
    fn test_int_argument_sign_extended() {
        let table = SyscallTable::linux_i386();
        // close(-1): fd slot holds a 32-bit -1
        let p = PendingSyscall::new(6, args(u32::MAX as u64, 0, 0), 1);
        assert_eq!(p.decode_arg(&table, &NoMemory, 0, 0), SyscallArg::Int(-1));
    }

    #[test]
    fn test_str_argument_bounded_read() {
        let table = SyscallTable::linux_i386();
        let mem = StringMemory(b"/tmp/out\0rest");
        // open("/tmp/out", ...)
        let p = PendingSyscall::new(5, args(0x1000, 0, 0), 1);
        assert_eq!(
            p.decode_arg(&table, &mem, 0, 128),
            SyscallArg::Str("/tmp/out".to_string())
        );
    }

    #[test]
    fn test_str_argument_fault_placeholder() {
        let table = SyscallTable::linux_i386();
        let p = PendingSyscall::new(5, args(0x1000, 0, 0), 1);
        assert_eq!(
            p.decode_arg(&table, &NoMemory, 0, 128),
            SyscallArg::Str(FAULT_PLACEHOLDER.to_string())
        );
    }

    #[test]
    fn test_ptr_argument_value_only() {
        let table = SyscallTable::linux_i386();
        // read(fd, buf, count): arg 1 is the buffer pointer
        let p = PendingSyscall::new(3, args(4, 0xdead_0000, 64), 1);
        assert_eq!(
            p.decode_arg(&table, &NoMemory, 1, 0),
            SyscallArg::Ptr(0xdead_0000)
        );
    }

    #[test]
    fn test_ptr_argument_dereference_fault() {
        let table = SyscallTable::linux_i386();
        let p = PendingSyscall::new(3, args(4, 0xdead_0000, 64), 1);
        assert_eq!(p.decode_arg(&table, &NoMemory, 1, 16), SyscallArg::Fault);
    }

    #[test]
    fn test_out_of_shape_index_falls_back_to_int() {
        let table = SyscallTable::linux_i386();
        // unknown syscall: no declared shape at all
        let p = PendingSyscall::new(9999, args(7, 0, 0), 1);
        assert_eq!(p.decode_arg(&table, &NoMemory, 0, 0), SyscallArg::Int(7));
    }

    #[test]
    fn test_out_of_range_index_degrades() {
        let table = SyscallTable::linux_i386();
        let p = PendingSyscall::new(5, args(0x1000, 0, 0), 1);
        // Past the captured slots: no panic, just a degraded argument.
        assert_eq!(
            p.decode_arg(&table, &NoMemory, SYSCALL_MAX_ARGS, 0),
            SyscallArg::Fault
        );
        assert_eq!(p.raw_arg(SYSCALL_MAX_ARGS + 3), None);
        assert_eq!(p.raw_arg(0), Some(0x1000));
    }
}
