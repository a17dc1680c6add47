//! Notification bus between the state providers and the analyses.
//!
//! Providers publish a [`Notification`] whenever something an analysis may
//! care about happens (a request completes, an FD is created, a thread is
//! scheduled in...). Analyses subscribe per [`NotificationKind`]; callbacks of
//! the same kind run in registration order, synchronously, before the
//! automaton moves on to the next provider.
//!
//! Payloads borrow from the state, so a callback can look but not touch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;

use crate::state::{
    BlockIoRequest, CpuId, Fd, HardIrq, IoRequest, Process, SoftIrq, SyscallEvent, Tid,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NotificationKind {
    SchedSwitchPerCpu,
    SchedSwitchPerTid,
    SchedMigrateTask,
    PrioChanged,
    IoRqExit,
    BlockRqComplete,
    CreateFd,
    UpdateFd,
    CloseFd,
    CreateParentProc,
    TidPageAlloc,
    TidPageFree,
    IrqHandlerEntry,
    IrqHandlerExit,
    SoftirqExit,
    NetDevXmit,
    NetifReceiveSkb,
    SyscallExit,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 18] = [
        NotificationKind::SchedSwitchPerCpu,
        NotificationKind::SchedSwitchPerTid,
        NotificationKind::SchedMigrateTask,
        NotificationKind::PrioChanged,
        NotificationKind::IoRqExit,
        NotificationKind::BlockRqComplete,
        NotificationKind::CreateFd,
        NotificationKind::UpdateFd,
        NotificationKind::CloseFd,
        NotificationKind::CreateParentProc,
        NotificationKind::TidPageAlloc,
        NotificationKind::TidPageFree,
        NotificationKind::IrqHandlerEntry,
        NotificationKind::IrqHandlerExit,
        NotificationKind::SoftirqExit,
        NotificationKind::NetDevXmit,
        NotificationKind::NetifReceiveSkb,
        NotificationKind::SyscallExit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::SchedSwitchPerCpu => "sched_switch_per_cpu",
            NotificationKind::SchedSwitchPerTid => "sched_switch_per_tid",
            NotificationKind::SchedMigrateTask => "sched_migrate_task",
            NotificationKind::PrioChanged => "prio_changed",
            NotificationKind::IoRqExit => "io_rq_exit",
            NotificationKind::BlockRqComplete => "block_rq_complete",
            NotificationKind::CreateFd => "create_fd",
            NotificationKind::UpdateFd => "update_fd",
            NotificationKind::CloseFd => "close_fd",
            NotificationKind::CreateParentProc => "create_parent_proc",
            NotificationKind::TidPageAlloc => "tid_page_alloc",
            NotificationKind::TidPageFree => "tid_page_free",
            NotificationKind::IrqHandlerEntry => "irq_handler_entry",
            NotificationKind::IrqHandlerExit => "irq_handler_exit",
            NotificationKind::SoftirqExit => "softirq_exit",
            NotificationKind::NetDevXmit => "net_dev_xmit",
            NotificationKind::NetifReceiveSkb => "netif_receive_skb",
            NotificationKind::SyscallExit => "syscall_exit",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        NotificationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown notification {s}"))
    }
}

/// Payload shared by the per-CPU and per-thread switch notifications.
#[derive(Clone, Copy, Debug)]
pub struct SchedSwitch<'a> {
    pub timestamp: i64,
    pub cpu_id: CpuId,
    pub prev_tid: Tid,
    pub next_tid: Tid,
    pub next_comm: &'a str,
    pub wakee_proc: &'a Process,
    pub waker_proc: Option<&'a Process>,
    /// Time from the first wakeup to this switch, when the wakeup was traced.
    pub wakeup_latency: Option<i64>,
}

/// Payload of the FD lifecycle notifications.
#[derive(Clone, Copy, Debug)]
pub struct FdChange<'a> {
    pub fd: &'a Fd,
    /// Process owning the FD table.
    pub parent_proc: &'a Process,
    pub timestamp: i64,
    pub cpu_id: Option<CpuId>,
}

#[derive(Clone, Copy, Debug)]
pub enum Notification<'a> {
    SchedSwitchPerCpu(SchedSwitch<'a>),
    SchedSwitchPerTid(SchedSwitch<'a>),
    SchedMigrateTask {
        proc: &'a Process,
        cpu_id: Option<CpuId>,
        dest_cpu: Option<CpuId>,
    },
    PrioChanged {
        timestamp: i64,
        tid: Tid,
        prio: i64,
    },
    IoRqExit {
        io_rq: &'a IoRequest,
        proc: &'a Process,
        parent_proc: &'a Process,
    },
    BlockRqComplete {
        req: &'a BlockIoRequest,
        proc: Option<&'a Process>,
    },
    CreateFd(FdChange<'a>),
    UpdateFd(FdChange<'a>),
    CloseFd(FdChange<'a>),
    CreateParentProc {
        proc: &'a Process,
        parent_proc: &'a Process,
    },
    TidPageAlloc {
        proc: &'a Process,
        cpu_id: CpuId,
    },
    TidPageFree {
        proc: &'a Process,
        cpu_id: CpuId,
    },
    IrqHandlerEntry {
        id: i64,
        irq_name: Option<&'a str>,
        cpu_id: CpuId,
    },
    IrqHandlerExit {
        hard_irq: &'a HardIrq,
    },
    SoftirqExit {
        softirq: &'a SoftIrq,
    },
    NetDevXmit {
        iface_name: &'a str,
        sent_bytes: u64,
        cpu_id: Option<CpuId>,
    },
    NetifReceiveSkb {
        iface_name: &'a str,
        recv_bytes: u64,
        cpu_id: Option<CpuId>,
    },
    SyscallExit {
        proc: &'a Process,
        syscall: &'a SyscallEvent,
        cpu_id: CpuId,
    },
}

impl Notification<'_> {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::SchedSwitchPerCpu(_) => NotificationKind::SchedSwitchPerCpu,
            Notification::SchedSwitchPerTid(_) => NotificationKind::SchedSwitchPerTid,
            Notification::SchedMigrateTask { .. } => NotificationKind::SchedMigrateTask,
            Notification::PrioChanged { .. } => NotificationKind::PrioChanged,
            Notification::IoRqExit { .. } => NotificationKind::IoRqExit,
            Notification::BlockRqComplete { .. } => NotificationKind::BlockRqComplete,
            Notification::CreateFd(_) => NotificationKind::CreateFd,
            Notification::UpdateFd(_) => NotificationKind::UpdateFd,
            Notification::CloseFd(_) => NotificationKind::CloseFd,
            Notification::CreateParentProc { .. } => NotificationKind::CreateParentProc,
            Notification::TidPageAlloc { .. } => NotificationKind::TidPageAlloc,
            Notification::TidPageFree { .. } => NotificationKind::TidPageFree,
            Notification::IrqHandlerEntry { .. } => NotificationKind::IrqHandlerEntry,
            Notification::IrqHandlerExit { .. } => NotificationKind::IrqHandlerExit,
            Notification::SoftirqExit { .. } => NotificationKind::SoftirqExit,
            Notification::NetDevXmit { .. } => NotificationKind::NetDevXmit,
            Notification::NetifReceiveSkb { .. } => NotificationKind::NetifReceiveSkb,
            Notification::SyscallExit { .. } => NotificationKind::SyscallExit,
        }
    }
}

pub type Callback = Box<dyn FnMut(&Notification<'_>)>;

#[derive(Default)]
pub struct NotificationBus {
    subscribers: HashMap<NotificationKind, Vec<Callback>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: NotificationKind, callback: F)
    where
        F: FnMut(&Notification<'_>) + 'static,
    {
        self.subscribers
            .entry(kind)
            .or_default()
            .push(Box::new(callback));
    }

    pub fn has_subscribers(&self, kind: NotificationKind) -> bool {
        self.subscribers.get(&kind).is_some_and(|cbs| !cbs.is_empty())
    }

    pub fn publish(&mut self, notification: &Notification<'_>) {
        if let Some(callbacks) = self.subscribers.get_mut(&notification.kind()) {
            for callback in callbacks.iter_mut() {
                callback(notification);
            }
        }
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<(&'static str, usize)> = self
            .subscribers
            .iter()
            .map(|(kind, cbs)| (kind.as_str(), cbs.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("NotificationBus")
            .field("subscribers", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in NotificationKind::ALL {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
        }
        assert!("sched_switch".parse::<NotificationKind>().is_err());
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = NotificationBus::new();

        for id in 0..3 {
            let seen = Rc::clone(&seen);
            bus.register(NotificationKind::PrioChanged, move |n| {
                if let Notification::PrioChanged { prio, .. } = n {
                    seen.borrow_mut().push((id, *prio));
                }
            });
        }

        bus.publish(&Notification::PrioChanged {
            timestamp: 1,
            tid: 5,
            prio: 20,
        });
        assert_eq!(*seen.borrow(), vec![(0, 20), (1, 20), (2, 20)]);
    }

    #[test]
    fn test_publish_only_reaches_matching_kind() {
        let count = Rc::new(RefCell::new(0));
        let mut bus = NotificationBus::new();
        {
            let count = Rc::clone(&count);
            bus.register(NotificationKind::NetDevXmit, move |_| {
                *count.borrow_mut() += 1;
            });
        }
        assert!(bus.has_subscribers(NotificationKind::NetDevXmit));
        assert!(!bus.has_subscribers(NotificationKind::NetifReceiveSkb));

        bus.publish(&Notification::NetifReceiveSkb {
            iface_name: "eth0",
            recv_bytes: 60,
            cpu_id: None,
        });
        bus.publish(&Notification::NetDevXmit {
            iface_name: "eth0",
            sent_bytes: 60,
            cpu_id: Some(0),
        });
        assert_eq!(*count.borrow(), 1);
    }
}
