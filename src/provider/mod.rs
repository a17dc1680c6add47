//! State providers.
//!
//! Each provider owns one kernel subsystem's worth of event handlers and
//! keeps its part of the [`State`] up to date. Providers never talk to each
//! other: anything they share goes through the state, and the automaton's
//! fixed dispatch order guarantees that e.g. the I/O provider sees the
//! current tid the scheduler provider set for the same event.

pub mod block;
pub mod io;
pub mod irq;
pub mod mem;
pub mod net;
pub mod sched;
pub mod statedump;
pub mod syscalls;

use std::collections::HashMap;

use crate::event::TraceEvent;
use crate::notify::{FdChange, Notification};
use crate::state::{CpuId, Fd, IoRequest, State, Tid};

pub use block::BlockProvider;
pub use io::IoProvider;
pub use irq::IrqProvider;
pub use mem::MemProvider;
pub use net::NetProvider;
pub use sched::SchedProvider;
pub use statedump::StatedumpProvider;
pub use syscalls::SyscallProvider;

pub trait StateProvider {
    fn name(&self) -> &'static str;

    /// Apply one event. Events this provider has no handler for are
    /// ignored.
    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent);
}

pub(crate) type Handler<P> = fn(&mut P, &mut State, &dyn TraceEvent);

/// Event name to handler mapping, built once per provider.
pub(crate) struct HandlerTable<P> {
    handlers: HashMap<&'static str, Handler<P>>,
}

pub(crate) const SYSCALL_ENTRY: &str = "syscall_entry";
pub(crate) const SYSCALL_EXIT: &str = "syscall_exit";

impl<P> HandlerTable<P> {
    pub(crate) fn new(entries: &[(&'static str, Handler<P>)]) -> Self {
        Self {
            handlers: entries.iter().copied().collect(),
        }
    }

    /// Find the handler for an event. An exact name match wins, then
    /// syscall events fall back to the generic entry/exit handlers.
    pub(crate) fn lookup(&self, name: &str) -> Option<Handler<P>> {
        if let Some(handler) = self.handlers.get(name) {
            return Some(*handler);
        }
        let family = if name.starts_with("sys_") || name.starts_with("syscall_entry_") {
            SYSCALL_ENTRY
        } else if name == "exit_syscall" || name.starts_with("syscall_exit_") {
            SYSCALL_EXIT
        } else {
            return None;
        };
        self.handlers.get(family).copied()
    }
}

/// Thread running on the CPU that recorded `event`.
pub(crate) fn current_tid(state: &State, event: &dyn TraceEvent) -> Option<Tid> {
    state.current_tid(event.cpu_id()?)
}

/// I/O request of the syscall `tid` is currently in, if any.
pub(crate) fn current_io_rq(state: &mut State, tid: Tid) -> Option<&mut IoRequest> {
    state
        .tids
        .get_mut(&tid)?
        .current_syscall
        .as_mut()?
        .io_rq
        .as_mut()
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum FdChangeKind {
    Create,
    Update,
    Close,
}

/// Publish a change to FD `fd` of the process `owner`. Nothing is sent if
/// the FD is not in the table.
pub(crate) fn notify_fd(
    state: &mut State,
    change: FdChangeKind,
    owner: Tid,
    fd: i64,
    timestamp: i64,
    cpu_id: Option<CpuId>,
) {
    let State {
        tids,
        notifications,
        ..
    } = state;
    let Some(parent_proc) = tids.get(&owner) else {
        return;
    };
    let Some(fd) = parent_proc.fds.get(&fd) else {
        return;
    };
    let payload = FdChange {
        fd,
        parent_proc,
        timestamp,
        cpu_id,
    };
    notifications.publish(&match change {
        FdChangeKind::Create => Notification::CreateFd(payload),
        FdChangeKind::Update => Notification::UpdateFd(payload),
        FdChangeKind::Close => Notification::CloseFd(payload),
    });
}

/// Insert `fd` into the table of `owner` unless the number is taken, and
/// publish `create_fd` for it. Returns whether it was inserted.
pub(crate) fn ensure_fd(
    state: &mut State,
    owner: Tid,
    fd: Fd,
    timestamp: i64,
    cpu_id: Option<CpuId>,
) -> bool {
    let fds = &mut state.process_mut(owner).fds;
    if fds.contains_key(&fd.fd) {
        return false;
    }
    let num = fd.fd;
    fds.insert(num, fd);
    notify_fd(state, FdChangeKind::Create, owner, num, timestamp, cpu_id);
    true
}

/// Publish `close_fd` and remove the FD from the table of `owner`.
pub(crate) fn close_fd(
    state: &mut State,
    owner: Tid,
    fd: i64,
    timestamp: i64,
    cpu_id: Option<CpuId>,
) -> Option<Fd> {
    notify_fd(state, FdChangeKind::Close, owner, fd, timestamp, cpu_id);
    state.tids.get_mut(&owner)?.fds.remove(&fd)
}

/// Store a new priority for `tid`, publishing `prio_changed` when it
/// differs from the known one. The swapper is ignored.
pub(crate) fn check_prio_changed(state: &mut State, timestamp: i64, tid: Tid, prio: i64) {
    if tid == 0 {
        return;
    }
    let proc = state.process_mut(tid);
    if proc.prio == Some(prio) {
        return;
    }
    proc.prio = Some(prio);
    state
        .notifications
        .publish(&Notification::PrioChanged {
            timestamp,
            tid,
            prio,
        });
}
