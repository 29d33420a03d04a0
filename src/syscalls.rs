//! Syscall table and architecture ABI
//!
//! The engine never switches on raw syscall numbers. An injected
//! `SyscallTable` maps numbers to a small closed class plus an argument
//! shape, and a `SyscallAbi` extracts the number and raw argument slots
//! from a register snapshot. Swapping either keeps the accounting and
//! derivation logic architecture-independent.

use fnv::FnvHashMap;

/// Maximum number of argument slots captured at syscall entry.
pub const SYSCALL_MAX_ARGS: usize = 6;

/// Cap for bounded string-argument reads from guest memory.
pub const STR_SAMPLE_LEN: usize = 128;

/// The closed set of syscall classes the engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallClass {
    Open,
    Close,
    Read,
    Write,
    Link,
    Rename,
    Other,
}

/// Declared interpretation of one argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Plain integer value.
    Int,
    /// Pointer; fetched as raw address or dereferenced on demand.
    Ptr,
    /// Pointer to a NUL-terminated string; read with a bounded scan.
    Str,
}

/// Static description of one syscall.
#[derive(Debug, Clone)]
pub struct SyscallSpec {
    pub name: &'static str,
    pub class: SyscallClass,
    pub args: &'static [ArgKind],
}

const OTHER_SPEC: SyscallSpec = SyscallSpec {
    name: "unknown",
    class: SyscallClass::Other,
    args: &[],
};

/// Map from raw syscall number to spec.
///
/// Numbers absent from the table resolve to a generic `Other` spec rather
/// than an error; the engine only needs precise shapes for the file
/// syscalls it accounts.
#[derive(Debug, Clone)]
pub struct SyscallTable {
    entries: FnvHashMap<i64, SyscallSpec>,
}

impl SyscallTable {
    pub fn new() -> Self {
        Self {
            entries: FnvHashMap::default(),
        }
    }

    pub fn insert(&mut self, nr: i64, spec: SyscallSpec) {
        self.entries.insert(nr, spec);
    }

    /// Resolve a raw syscall number. Unknown numbers yield the `Other`
    /// spec, never an error.
    pub fn lookup(&self, nr: i64) -> &SyscallSpec {
        self.entries.get(&nr).unwrap_or(&OTHER_SPEC)
    }

    /// Classic Linux i386 numbering for the syscalls the engine accounts.
    pub fn linux_i386() -> Self {
        use ArgKind::{Int, Ptr, Str};
        let mut t = Self::new();
        let mut add =
            |nr: i64, name: &'static str, class: SyscallClass, args: &'static [ArgKind]| {
                t.insert(nr, SyscallSpec { name, class, args });
            };

        add(3, "read", SyscallClass::Read, &[Int, Ptr, Int]);
        add(4, "write", SyscallClass::Write, &[Int, Ptr, Int]);
        add(5, "open", SyscallClass::Open, &[Str, Int, Int]);
        add(6, "close", SyscallClass::Close, &[Int]);
        // creat(2) is open with O_CREAT|O_WRONLY|O_TRUNC
        add(8, "creat", SyscallClass::Open, &[Str, Int]);
        add(9, "link", SyscallClass::Link, &[Str, Str]);
        add(10, "unlink", SyscallClass::Other, &[Str]);
        add(11, "execve", SyscallClass::Other, &[Str, Ptr, Ptr]);
        add(19, "lseek", SyscallClass::Other, &[Int, Int, Int]);
        add(38, "rename", SyscallClass::Rename, &[Str, Str]);
        add(41, "dup", SyscallClass::Other, &[Int]);
        add(63, "dup2", SyscallClass::Other, &[Int, Int]);
        add(106, "stat", SyscallClass::Other, &[Str, Ptr]);
        add(108, "fstat", SyscallClass::Other, &[Int, Ptr]);
        add(120, "clone", SyscallClass::Other, &[Int, Ptr]);
        add(145, "readv", SyscallClass::Other, &[Int, Ptr, Int]);
        add(146, "writev", SyscallClass::Other, &[Int, Ptr, Int]);
        t
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::linux_i386()
    }
}

/// Raw register file captured at a syscall boundary.
///
/// The instruction monitor supplies this verbatim; only a `SyscallAbi`
/// knows which slot means what.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub regs: [u64; 8],
}

impl RegisterSnapshot {
    pub fn new(regs: [u64; 8]) -> Self {
        Self { regs }
    }
}

/// Architecture-specific extraction of syscall number and argument slots.
pub trait SyscallAbi {
    fn syscall_number(&self, regs: &RegisterSnapshot) -> i64;
    fn args(&self, regs: &RegisterSnapshot) -> [u64; SYSCALL_MAX_ARGS];
}

/// Linux i386 convention: number in EAX; arguments in EBX, ECX, EDX, ESI,
/// EDI, EBP.
///
/// Register slot layout: 0=EAX 1=EBX 2=ECX 3=EDX 4=ESI 5=EDI 6=EBP 7=ESP.
#[derive(Debug, Clone, Copy, Default)]
pub struct I386Abi;

impl SyscallAbi for I386Abi {
    fn syscall_number(&self, regs: &RegisterSnapshot) -> i64 {
        regs.regs[0] as i64
    }

    fn args(&self, regs: &RegisterSnapshot) -> [u64; SYSCALL_MAX_ARGS] {
        [
            regs.regs[1],
            regs.regs[2],
            regs.regs[3],
            regs.regs[4],
            regs.regs[5],
            regs.regs[6],
        ]
    }
}
