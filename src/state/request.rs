use std::collections::BTreeMap;

use serde::Serialize;

use crate::abi::SECTOR_SIZE;
use crate::state::process::{FdType, Tid};

/// Strip the tracer's syscall event prefix: `sys_open` and
/// `syscall_entry_open` both give `open`.
pub fn syscall_name(event_name: &str) -> &str {
    event_name
        .strip_prefix("syscall_entry_")
        .or_else(|| event_name.strip_prefix("sys_"))
        .unwrap_or(event_name)
}

/// How an I/O-relevant syscall is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallClass {
    /// open, openat
    DiskOpen,
    Socket,
    /// accept, accept4
    Accept,
    /// dup, dup2, dup3, fcntl
    Dup,
    Close,
    Read,
    Write,
    /// splice, sendfile64: read on one FD and write on another
    ReadWrite,
    Sync,
    Connect,
}

impl SyscallClass {
    pub fn of(name: &str) -> Option<Self> {
        let class = match name {
            "open" | "openat" => SyscallClass::DiskOpen,
            "socket" => SyscallClass::Socket,
            "accept" | "accept4" => SyscallClass::Accept,
            "fcntl" | "dup" | "dup2" | "dup3" => SyscallClass::Dup,
            "close" => SyscallClass::Close,
            "read" | "recvmsg" | "recvfrom" | "readv" | "pread" | "pread64" | "preadv" => {
                SyscallClass::Read
            }
            "write" | "sendmsg" | "sendto" | "writev" | "pwrite" | "pwrite64" | "pwritev" => {
                SyscallClass::Write
            }
            "splice" | "sendfile64" => SyscallClass::ReadWrite,
            "sync" | "sync_file_range" | "fsync" | "fdatasync" => SyscallClass::Sync,
            "connect" => SyscallClass::Connect,
            _ => return None,
        };
        Some(class)
    }

    pub fn is_io(name: &str) -> bool {
        Self::of(name).is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum IoOperation {
    Open,
    Read,
    Write,
    Close,
    Sync,
    /// Both reads and writes, e.g. splice and sendfile.
    ReadWrite,
    Connect,
}

impl IoOperation {
    /// `ReadWrite` behaves like the set {Read, Write}.
    pub fn is_equivalent(self, other: IoOperation) -> bool {
        use IoOperation::*;
        match (self, other) {
            (ReadWrite, Read | Write | ReadWrite) => true,
            (Read, Read | ReadWrite) => true,
            (Write, Write | ReadWrite) => true,
            (a, b) => a == b,
        }
    }
}

/// One syscall invocation, attached to its thread from entry to exit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyscallEvent {
    pub name: String,
    pub begin_ts: i64,
    pub end_ts: Option<i64>,
    /// Missing for a few syscalls traced without their return value by old
    /// lttng-modules on some architectures.
    pub ret: Option<i64>,
    pub duration: Option<i64>,
    /// Set for I/O syscalls by the I/O provider.
    pub io_rq: Option<IoRequest>,
}

impl SyscallEvent {
    pub fn new(name: &str, begin_ts: i64) -> Self {
        Self {
            name: name.to_string(),
            begin_ts,
            end_ts: None,
            ret: None,
            duration: None,
            io_rq: None,
        }
    }

    pub(crate) fn finish(&mut self, end_ts: i64, ret: Option<i64>) {
        self.end_ts = Some(end_ts);
        self.ret = ret;
        self.duration = Some(end_ts - self.begin_ts);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OpenRequest {
    /// Set on a successful exit.
    pub fd: Option<i64>,
    pub filename: String,
    pub fd_type: FdType,
    pub family: Option<i64>,
    pub cloexec: bool,
}

impl OpenRequest {
    pub fn new(filename: impl Into<String>, fd_type: FdType) -> Self {
        Self {
            fd: None,
            filename: filename.into(),
            fd_type,
            family: None,
            cloexec: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReadWriteRequest {
    /// `Read`, `Write` or `ReadWrite`.
    pub operation: IoOperation,
    /// Unused when `fd_in`/`fd_out` are set.
    pub fd: Option<i64>,
    pub fd_in: Option<i64>,
    pub fd_out: Option<i64>,
    /// Requested size. Some syscalls (recvmsg, sendmsg) only report a size
    /// on exit.
    pub size: Option<u64>,
    pub returned_size: Option<u64>,
    /// Type guessed while the request was in flight, applied to the FD on
    /// exit if it was still unknown.
    pub fd_type_hint: Option<FdType>,
}

impl ReadWriteRequest {
    pub fn new(operation: IoOperation, fd: Option<i64>, size: Option<u64>) -> Self {
        Self {
            operation,
            fd,
            fd_in: None,
            fd_out: None,
            size,
            returned_size: None,
            fd_type_hint: None,
        }
    }

    pub fn splice(fd_in: Option<i64>, fd_out: Option<i64>, size: Option<u64>) -> Self {
        Self {
            fd_in,
            fd_out,
            ..Self::new(IoOperation::ReadWrite, None, size)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum IoRequestKind {
    Open(OpenRequest),
    Close { fd: i64 },
    ReadWrite(ReadWriteRequest),
    Sync { fd: Option<i64>, size: Option<u64> },
    /// `address` is `ip:port` for INET destinations.
    Connect { fd: i64, address: Option<String> },
}

/// An I/O syscall classified by kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IoRequest {
    /// Thread that issued the request.
    pub tid: Tid,
    pub syscall_name: String,
    pub begin_ts: i64,
    pub end_ts: Option<i64>,
    pub duration: Option<i64>,
    /// Set when the request failed.
    pub errno: Option<i64>,
    pub pages_allocated: u64,
    pub pages_freed: u64,
    pub pages_written: u64,
    pub woke_kswapd: bool,
    pub kind: IoRequestKind,
}

impl IoRequest {
    pub fn new(begin_ts: i64, tid: Tid, syscall_name: &str, kind: IoRequestKind) -> Self {
        Self {
            tid,
            syscall_name: syscall_name.to_string(),
            begin_ts,
            end_ts: None,
            duration: None,
            errno: None,
            pages_allocated: 0,
            pages_freed: 0,
            pages_written: 0,
            woke_kswapd: false,
            kind,
        }
    }

    pub fn operation(&self) -> IoOperation {
        match &self.kind {
            IoRequestKind::Open(_) => IoOperation::Open,
            IoRequestKind::Close { .. } => IoOperation::Close,
            IoRequestKind::ReadWrite(rw) => rw.operation,
            IoRequestKind::Sync { .. } => IoOperation::Sync,
            IoRequestKind::Connect { .. } => IoOperation::Connect,
        }
    }

    /// The single FD the request works on, if any.
    pub fn fd(&self) -> Option<i64> {
        match &self.kind {
            IoRequestKind::Open(open) => open.fd,
            IoRequestKind::Close { fd } | IoRequestKind::Connect { fd, .. } => Some(*fd),
            IoRequestKind::ReadWrite(rw) => rw.fd,
            IoRequestKind::Sync { fd, .. } => *fd,
        }
    }

    /// Size in bytes: what the syscall returned for reads and writes,
    /// otherwise what was requested.
    pub fn size(&self) -> Option<u64> {
        match &self.kind {
            IoRequestKind::ReadWrite(rw) => rw.returned_size.or(rw.size),
            IoRequestKind::Sync { size, .. } => *size,
            _ => None,
        }
    }

    pub(crate) fn finish(&mut self, end_ts: i64, ret: Option<i64>) {
        self.end_ts = Some(end_ts);
        self.duration = Some(end_ts - self.begin_ts);

        let Some(ret) = ret else {
            return;
        };
        if ret < 0 {
            self.errno = Some(-ret);
            return;
        }

        match &mut self.kind {
            IoRequestKind::Open(open) => open.fd = Some(ret),
            IoRequestKind::ReadWrite(rw) => {
                let returned = ret as u64;
                rw.returned_size = Some(returned);
                if rw.size.is_none() {
                    rw.size = Some(returned);
                }
            }
            _ => {}
        }
    }
}

/// A block-layer request, from issue to completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockIoRequest {
    pub dev: u64,
    pub sector: u64,
    pub nr_sector: u64,
    /// `Read` or `Write`.
    pub operation: IoOperation,
    /// Issuing thread, when the tracer reports it.
    pub tid: Option<Tid>,
    pub begin_ts: i64,
    pub end_ts: Option<i64>,
    pub duration: Option<i64>,
}

impl BlockIoRequest {
    pub fn new(
        begin_ts: i64,
        dev: u64,
        sector: u64,
        nr_sector: u64,
        operation: IoOperation,
        tid: Option<Tid>,
    ) -> Self {
        Self {
            dev,
            sector,
            nr_sector,
            operation,
            tid,
            begin_ts,
            end_ts: None,
            duration: None,
        }
    }

    /// Operation from the `rwbs` flags: even means read, odd means write.
    pub fn operation_from_rwbs(rwbs: u64) -> IoOperation {
        if rwbs % 2 == 0 {
            IoOperation::Read
        } else {
            IoOperation::Write
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.nr_sector * SECTOR_SIZE
    }

    pub(crate) fn complete(&mut self, end_ts: i64) {
        self.end_ts = Some(end_ts);
        self.duration = Some(end_ts - self.begin_ts);
    }
}

/// A pending remap through a stacked block device: the request now at
/// `(dev, sector)` was originally issued to `(old_dev, old_sector)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BlockRemapRequest {
    pub dev: u64,
    pub sector: u64,
    pub old_dev: u64,
    pub old_sector: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Disk {
    pub dev: u64,
    /// Name from the statedump, e.g. `sda`.
    pub name: Option<String>,
    /// Issued and not yet completed requests, by sector.
    pub pending_requests: BTreeMap<u64, BlockIoRequest>,
}

impl Disk {
    pub fn new(dev: u64) -> Self {
        Self {
            dev,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_name() {
        assert_eq!(syscall_name("sys_open"), "open");
        assert_eq!(syscall_name("syscall_entry_openat"), "openat");
        assert_eq!(syscall_name("exit_syscall"), "exit_syscall");
    }

    #[test]
    fn test_classify() {
        assert_eq!(SyscallClass::of("openat"), Some(SyscallClass::DiskOpen));
        assert_eq!(SyscallClass::of("pread64"), Some(SyscallClass::Read));
        assert_eq!(SyscallClass::of("sendto"), Some(SyscallClass::Write));
        assert_eq!(SyscallClass::of("sendfile64"), Some(SyscallClass::ReadWrite));
        assert_eq!(SyscallClass::of("fdatasync"), Some(SyscallClass::Sync));
        assert!(!SyscallClass::is_io("getpid"));
    }

    #[test]
    fn test_operation_equivalence() {
        assert!(IoOperation::ReadWrite.is_equivalent(IoOperation::Read));
        assert!(IoOperation::Write.is_equivalent(IoOperation::ReadWrite));
        assert!(!IoOperation::Read.is_equivalent(IoOperation::Write));
        assert!(IoOperation::Sync.is_equivalent(IoOperation::Sync));
        assert!(!IoOperation::Open.is_equivalent(IoOperation::Close));
    }

    #[test]
    fn test_finish_read_without_entry_size() {
        let rw = ReadWriteRequest::new(IoOperation::Read, Some(4), None);
        let mut rq = IoRequest::new(10, 1, "recvmsg", IoRequestKind::ReadWrite(rw));
        rq.finish(25, Some(64));

        assert_eq!(rq.duration, Some(15));
        assert_eq!(rq.size(), Some(64));
        assert_eq!(rq.errno, None);
    }

    #[test]
    fn test_finish_failed_open() {
        let open = OpenRequest::new("/missing", FdType::Disk);
        let mut rq = IoRequest::new(10, 1, "open", IoRequestKind::Open(open));
        rq.finish(12, Some(-2));

        assert_eq!(rq.errno, Some(2));
        assert_eq!(rq.fd(), None);
    }

    #[test]
    fn test_block_request() {
        assert_eq!(BlockIoRequest::operation_from_rwbs(0), IoOperation::Read);
        assert_eq!(BlockIoRequest::operation_from_rwbs(1), IoOperation::Write);

        let mut req = BlockIoRequest::new(100, 8, 2048, 8, IoOperation::Read, Some(42));
        assert_eq!(req.size(), 4096);
        req.complete(90);
        assert_eq!(req.duration, Some(-10));
    }
}
