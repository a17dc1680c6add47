use std::collections::btree_map::Entry;

use crate::abi::has_cloexec;
use crate::event::TraceEvent;
use crate::notify::Notification;
use crate::provider::{notify_fd, FdChangeKind, HandlerTable, StateProvider};
use crate::state::{Fd, Process, State, Tid};

/// Seeds the state from the snapshot the tracer takes when a session
/// starts: processes, their open FDs and block device names.
pub struct StatedumpProvider {
    handlers: HandlerTable<Self>,
}

impl Default for StatedumpProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StatedumpProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                ("lttng_statedump_process_state", Self::process_state),
                ("lttng_statedump_file_descriptor", Self::file_descriptor),
                ("lttng_statedump_block_device", Self::block_device),
            ]),
        }
    }

    fn process_state(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(tid), Some(pid)) = (event.get_i64("tid"), event.get_i64("pid")) else {
            return;
        };
        let name = event.get_str("name").unwrap_or_default();

        let proc = state.process_mut(tid);
        proc.pid = Some(pid);
        proc.comm = name.to_string();
        // sched_* events know better.
        if proc.prio.is_none() {
            proc.prio = event.get_i64("prio");
        }

        if pid == tid {
            return;
        }

        state
            .tids
            .entry(pid)
            .or_insert_with(|| Process::with_pid(pid, pid, name));
        Self::assign_fds_to_parent(state, tid, pid);

        if let (Some(proc), Some(parent_proc)) = (state.tids.get(&tid), state.tids.get(&pid)) {
            state
                .notifications
                .publish(&Notification::CreateParentProc { proc, parent_proc });
        }
    }

    /// Move the FDs a thread collected before its leader was known to the
    /// leader. On conflict the leader's entry wins, only taking the
    /// thread's filename if it has none, and the counters add up.
    fn assign_fds_to_parent(state: &mut State, tid: Tid, pid: Tid) {
        let Some(thread) = state.tids.get_mut(&tid) else {
            return;
        };
        let fds = std::mem::take(&mut thread.fds);
        let Some(parent) = state.tids.get_mut(&pid) else {
            return;
        };

        for (num, fd) in fds {
            match parent.fds.entry(num) {
                Entry::Vacant(entry) => {
                    entry.insert(fd);
                }
                Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    if existing.filename.is_empty() {
                        existing.filename = fd.filename;
                    }
                    existing.io.merge(&fd.io);
                }
            }
        }
    }

    fn file_descriptor(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(pid), Some(fd), Some(filename)) = (
            event.get_i64("pid"),
            event.get_i64("fd"),
            event.get_str("filename"),
        ) else {
            return;
        };

        let proc = state
            .tids
            .entry(pid)
            .or_insert_with(|| Process::with_pid(pid, pid, ""));
        let change = match proc.fds.get_mut(&fd) {
            Some(existing) => {
                existing.filename = filename.to_string();
                FdChangeKind::Update
            }
            None => {
                proc.fds.insert(
                    fd,
                    Fd {
                        filename: filename.to_string(),
                        cloexec: event.get_i64("flags").is_some_and(has_cloexec),
                        ..Fd::new(fd)
                    },
                );
                FdChangeKind::Create
            }
        };
        notify_fd(state, change, pid, fd, event.timestamp(), event.cpu_id());
    }

    fn block_device(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let (Some(dev), Some(name)) = (event.get_u64("dev"), event.get_str("diskname")) {
            state.disk_mut(dev).name = Some(name.to_string());
        }
    }
}

impl StateProvider for StatedumpProvider {
    fn name(&self) -> &'static str {
        "statedump"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}
