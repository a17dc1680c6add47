use std::collections::BTreeMap;

use serde::Serialize;

use crate::abi::{DISK_FAMILIES, INET_FAMILIES};
use crate::state::request::{OpenRequest, SyscallEvent};

/// Kernel thread id. Also used for pids, which are the tid of the
/// thread-group leader.
pub type Tid = i64;

/// What an FD points to, as far as the trace tells us.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum FdType {
    #[default]
    Unknown,
    Disk,
    Net,
    /// Assumed network: a packet left a NIC while a write on this FD was in
    /// flight.
    MaybeNet,
}

impl FdType {
    /// Type of a freshly created socket, from its address family.
    pub fn from_socket_family(family: Option<i64>) -> FdType {
        match family {
            Some(f) if DISK_FAMILIES.contains(&f) => FdType::Disk,
            Some(f) if INET_FAMILIES.contains(&f) => FdType::Net,
            Some(_) => FdType::Unknown,
            None => FdType::Net,
        }
    }

    pub fn is_net(self) -> bool {
        matches!(self, FdType::Net | FdType::MaybeNet)
    }
}

/// Byte counters, split by the FD type at the time of the transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IoStats {
    pub read: u64,
    pub write: u64,
    pub net_read: u64,
    pub net_write: u64,
    pub disk_read: u64,
    pub disk_write: u64,
    pub unk_read: u64,
    pub unk_write: u64,
}

impl IoStats {
    pub fn add_read(&mut self, fd_type: FdType, bytes: u64) {
        match fd_type {
            t if t.is_net() => self.net_read = self.net_read.saturating_add(bytes),
            FdType::Disk => self.disk_read = self.disk_read.saturating_add(bytes),
            _ => self.unk_read = self.unk_read.saturating_add(bytes),
        }
        self.read = self.read.saturating_add(bytes);
    }

    pub fn add_write(&mut self, fd_type: FdType, bytes: u64) {
        match fd_type {
            t if t.is_net() => self.net_write = self.net_write.saturating_add(bytes),
            FdType::Disk => self.disk_write = self.disk_write.saturating_add(bytes),
            _ => self.unk_write = self.unk_write.saturating_add(bytes),
        }
        self.write = self.write.saturating_add(bytes);
    }

    pub fn merge(&mut self, other: &IoStats) {
        self.read = self.read.saturating_add(other.read);
        self.write = self.write.saturating_add(other.write);
        self.net_read = self.net_read.saturating_add(other.net_read);
        self.net_write = self.net_write.saturating_add(other.net_write);
        self.disk_read = self.disk_read.saturating_add(other.disk_read);
        self.disk_write = self.disk_write.saturating_add(other.disk_write);
        self.unk_read = self.unk_read.saturating_add(other.unk_read);
        self.unk_write = self.unk_write.saturating_add(other.unk_write);
    }
}

/// An open file descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fd {
    pub fd: i64,
    pub filename: String,
    pub fd_type: FdType,
    pub cloexec: bool,
    pub family: Option<i64>,
    pub io: IoStats,
}

impl Fd {
    pub fn new(fd: i64) -> Self {
        Self {
            fd,
            filename: "unknown".to_string(),
            fd_type: FdType::Unknown,
            cloexec: false,
            family: None,
            io: IoStats::default(),
        }
    }

    pub(crate) fn from_open_request(fd: i64, open: &OpenRequest) -> Self {
        Self {
            fd,
            filename: open.filename.clone(),
            fd_type: open.fd_type,
            cloexec: open.cloexec,
            family: open.family,
            io: IoStats::default(),
        }
    }

    /// Copy for a forked child: same file, fresh counters.
    pub fn duplicate(&self) -> Self {
        Self {
            io: IoStats::default(),
            ..self.clone()
        }
    }
}

/// A thread, or a process when `tid == pid`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Process {
    pub tid: Tid,
    /// Thread-group leader, once known.
    pub pid: Option<Tid>,
    pub comm: String,
    pub prio: Option<i64>,
    pub current_syscall: Option<SyscallEvent>,
    /// Open FDs by number. Only meaningful on the thread-group leader once
    /// the pid is known.
    pub fds: BTreeMap<i64, Fd>,
    /// Thread scheduled on the CPU right before this one.
    pub prev_tid: Option<Tid>,
    pub last_wakeup: Option<i64>,
    pub last_waker: Option<Tid>,
    pub migrate_count: u64,
    pub io: IoStats,
}

impl Process {
    pub fn new(tid: Tid) -> Self {
        Self {
            tid,
            ..Default::default()
        }
    }

    pub fn with_pid(tid: Tid, pid: Tid, comm: &str) -> Self {
        Self {
            tid,
            pid: Some(pid),
            comm: comm.to_string(),
            ..Default::default()
        }
    }

    /// True for a secondary thread whose leader is known.
    pub fn is_thread(&self) -> bool {
        self.pid.is_some_and(|pid| pid != self.tid)
    }

    /// Tid of the thread-group leader, or our own tid if unknown.
    pub fn leader_tid(&self) -> Tid {
        self.pid.unwrap_or(self.tid)
    }
}
