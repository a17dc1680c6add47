//! The reconstructed system state.
//!
//! [`State`] is owned by the [`crate::Automaton`] and mutated only by the
//! state providers while an event is dispatched. Everything else gets a
//! shared reference: analyses through the query methods below, or through
//! the payloads of the notifications they subscribed to.

pub mod cpu;
pub mod process;
pub mod request;

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::config::{AutomatonConfig, TracerVersion};
use crate::notify::{Notification, NotificationBus, NotificationKind};

pub use cpu::{Cpu, CpuId, HardIrq, SoftIrq};
pub use process::{Fd, FdType, IoStats, Process, Tid};
pub use request::{
    BlockIoRequest, BlockRemapRequest, Disk, IoOperation, IoRequest, IoRequestKind, OpenRequest,
    ReadWriteRequest, SyscallEvent,
};

/// System-wide page accounting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MemoryManagement {
    /// Pages allocated and not yet freed since the start of the trace.
    pub page_count: u64,
}

/// A network interface, with traffic seen since the start of the trace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Iface {
    pub name: String,
    pub sent_bytes: u64,
    pub recv_bytes: u64,
    pub sent_packets: u64,
    pub recv_packets: u64,
}

impl Iface {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct State {
    pub(crate) cpus: BTreeMap<CpuId, Cpu>,
    pub(crate) tids: BTreeMap<Tid, Process>,
    pub(crate) disks: BTreeMap<u64, Disk>,
    pub(crate) ifaces: BTreeMap<String, Iface>,
    pub(crate) mm: MemoryManagement,
    pub(crate) tracer_version: Option<TracerVersion>,
    /// Subtract the +100 offset old tracers add to wakeup priorities.
    #[serde(skip)]
    pub(crate) prio_offset_fix: bool,
    #[serde(skip)]
    pub(crate) notifications: NotificationBus,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &AutomatonConfig) -> Self {
        Self {
            tracer_version: config.tracer_version.clone(),
            prio_offset_fix: config.needs_prio_offset_fix(),
            ..Default::default()
        }
    }

    pub fn cpu(&self, cpu_id: CpuId) -> Option<&Cpu> {
        self.cpus.get(&cpu_id)
    }

    pub fn cpus(&self) -> &BTreeMap<CpuId, Cpu> {
        &self.cpus
    }

    pub fn process(&self, tid: Tid) -> Option<&Process> {
        self.tids.get(&tid)
    }

    pub fn processes(&self) -> &BTreeMap<Tid, Process> {
        &self.tids
    }

    pub fn disk(&self, dev: u64) -> Option<&Disk> {
        self.disks.get(&dev)
    }

    pub fn disks(&self) -> &BTreeMap<u64, Disk> {
        &self.disks
    }

    pub fn iface(&self, name: &str) -> Option<&Iface> {
        self.ifaces.get(name)
    }

    pub fn ifaces(&self) -> &BTreeMap<String, Iface> {
        &self.ifaces
    }

    pub fn mm(&self) -> &MemoryManagement {
        &self.mm
    }

    pub fn tracer_version(&self) -> Option<&TracerVersion> {
        self.tracer_version.as_ref()
    }

    /// The process whose FD table `tid` uses: its thread-group leader when
    /// that is known, the thread itself otherwise.
    pub fn fd_owner(&self, tid: Tid) -> Option<&Process> {
        self.tids.get(&self.fd_owner_tid(tid))
    }

    /// Look up an FD as seen by thread `tid`.
    pub fn fd(&self, tid: Tid, fd: i64) -> Option<&Fd> {
        self.fd_owner(tid)?.fds.get(&fd)
    }

    /// Block requests issued and never completed.
    pub fn orphaned_block_requests(&self) -> impl Iterator<Item = &BlockIoRequest> {
        self.disks
            .values()
            .flat_map(|disk| disk.pending_requests.values())
    }

    /// Threads currently inside a syscall.
    pub fn in_flight_syscalls(&self) -> impl Iterator<Item = (Tid, &SyscallEvent)> {
        self.tids
            .values()
            .filter_map(|proc| Some((proc.tid, proc.current_syscall.as_ref()?)))
    }

    pub fn pending_hard_irqs(&self) -> impl Iterator<Item = &HardIrq> {
        self.cpus
            .values()
            .filter_map(|cpu| cpu.current_hard_irq.as_ref())
    }

    /// Subscribe to a notification kind. Callbacks of the same kind run in
    /// registration order.
    pub fn register<F>(&mut self, kind: NotificationKind, callback: F)
    where
        F: FnMut(&Notification<'_>) + 'static,
    {
        self.notifications.register(kind, callback);
    }

    /// Like [`State::register`], with the notification given by name, e.g.
    /// `"block_rq_complete"`.
    pub fn register_by_name<F>(&mut self, name: &str, callback: F) -> Result<()>
    where
        F: FnMut(&Notification<'_>) + 'static,
    {
        let kind: NotificationKind = name.parse()?;
        self.register(kind, callback);
        Ok(())
    }

    pub(crate) fn cpu_mut(&mut self, cpu_id: CpuId) -> &mut Cpu {
        self.cpus.entry(cpu_id).or_insert_with(|| {
            tracing::debug!("New CPU {}", cpu_id);
            Cpu::new(cpu_id)
        })
    }

    pub(crate) fn process_mut(&mut self, tid: Tid) -> &mut Process {
        self.tids.entry(tid).or_insert_with(|| match tid {
            // swapper
            0 => Process::with_pid(0, 0, ""),
            _ => Process::new(tid),
        })
    }

    pub(crate) fn disk_mut(&mut self, dev: u64) -> &mut Disk {
        self.disks.entry(dev).or_insert_with(|| Disk::new(dev))
    }

    pub(crate) fn iface_mut(&mut self, name: &str) -> &mut Iface {
        self.ifaces
            .entry(name.to_string())
            .or_insert_with(|| Iface::new(name))
    }

    pub(crate) fn current_tid(&self, cpu_id: CpuId) -> Option<Tid> {
        self.cpus.get(&cpu_id)?.current_tid
    }

    pub(crate) fn fd_owner_tid(&self, tid: Tid) -> Tid {
        match self.tids.get(&tid).and_then(|proc| proc.pid) {
            Some(pid) if pid != tid && self.tids.contains_key(&pid) => pid,
            _ => tid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapper_gets_pid_zero() {
        let mut state = State::new();
        assert_eq!(state.process_mut(0).pid, Some(0));
        assert_eq!(state.process_mut(5).pid, None);
    }

    #[test]
    fn test_fd_owner_resolution() {
        let mut state = State::new();
        state.tids.insert(11, Process::with_pid(11, 10, "worker"));
        // Leader not seen yet: the thread keeps its own table.
        assert_eq!(state.fd_owner_tid(11), 11);

        let mut leader = Process::with_pid(10, 10, "worker");
        leader.fds.insert(3, Fd::new(3));
        state.tids.insert(10, leader);
        assert_eq!(state.fd_owner_tid(11), 10);
        assert!(state.fd(11, 3).is_some());
        assert!(state.fd(11, 4).is_none());
        assert_eq!(state.fd_owner_tid(99), 99);
    }

    #[test]
    fn test_orphan_queries() {
        let mut state = State::new();
        state
            .disk_mut(8)
            .pending_requests
            .insert(100, BlockIoRequest::new(1, 8, 100, 8, IoOperation::Read, None));
        state.cpu_mut(0).enter_hard_irq(3, 5);
        state.process_mut(7).current_syscall = Some(SyscallEvent::new("getpid", 9));

        assert_eq!(state.orphaned_block_requests().count(), 1);
        assert_eq!(state.pending_hard_irqs().count(), 1);
        let syscalls: Vec<_> = state.in_flight_syscalls().collect();
        assert_eq!(syscalls.len(), 1);
        assert_eq!(syscalls[0].0, 7);
        assert_eq!(syscalls[0].1.name, "getpid");
    }

    #[test]
    fn test_register_by_name() {
        let mut state = State::new();
        assert!(state.register_by_name("create_fd", |_| {}).is_ok());
        assert!(state.register_by_name("open_fd", |_| {}).is_err());
        assert!(state.notifications.has_subscribers(NotificationKind::CreateFd));
    }

    #[test]
    fn test_config_carries_version() {
        let config = AutomatonConfig::from_json(r#"{ "tracer_version": "2.6.0" }"#).unwrap();
        let state = State::with_config(&config);
        assert!(state.prio_offset_fix);
        assert_eq!(state.tracer_version(), Some(&TracerVersion::new(2, 6, 0)));
    }
}
