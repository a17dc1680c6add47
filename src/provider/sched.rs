use std::collections::BTreeMap;

use crate::event::TraceEvent;
use crate::notify::{Notification, SchedSwitch};
use crate::provider::{
    check_prio_changed, close_fd, notify_fd, FdChangeKind, HandlerTable, StateProvider,
};
use crate::state::{CpuId, Fd, Process, State};

/// Tracks which thread runs on each CPU, wakeups, migrations, forks and
/// execs.
pub struct SchedProvider {
    handlers: HandlerTable<Self>,
}

impl Default for SchedProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn get_cpu(event: &dyn TraceEvent, name: &str) -> Option<CpuId> {
    event.get_u64(name).and_then(|v| CpuId::try_from(v).ok())
}

impl SchedProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                ("sched_switch", Self::sched_switch),
                ("sched_migrate_task", Self::sched_migrate_task),
                ("sched_wakeup", Self::sched_wakeup),
                ("sched_wakeup_new", Self::sched_wakeup),
                ("sched_waking", Self::sched_wakeup),
                ("sched_process_fork", Self::sched_process_fork),
                ("sched_process_exec", Self::sched_process_exec),
                ("sched_pi_setprio", Self::sched_pi_setprio),
            ]),
        }
    }

    fn sched_switch(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(cpu_id), Some(prev_tid), Some(next_tid)) = (
            event.cpu_id(),
            event.get_i64("prev_tid"),
            event.get_i64("next_tid"),
        ) else {
            tracing::trace!("Ignoring incomplete sched_switch at {}", event.timestamp());
            return;
        };
        let ts = event.timestamp();

        state.cpu_mut(cpu_id).current_tid = (next_tid != 0).then_some(next_tid);

        state.process_mut(prev_tid);
        let next = state.process_mut(next_tid);
        if let Some(comm) = event.get_str("next_comm") {
            next.comm = comm.to_string();
        }
        next.prev_tid = Some(prev_tid);

        if let Some(prio) = event.get_i64("prev_prio") {
            check_prio_changed(state, ts, prev_tid, prio);
        }
        if let Some(prio) = event.get_i64("next_prio") {
            check_prio_changed(state, ts, next_tid, prio);
        }

        let State {
            tids,
            notifications,
            ..
        } = state;
        if let Some(wakee) = tids.get(&next_tid) {
            let switch = SchedSwitch {
                timestamp: ts,
                cpu_id,
                prev_tid,
                next_tid,
                next_comm: &wakee.comm,
                wakee_proc: wakee,
                waker_proc: wakee.last_waker.and_then(|tid| tids.get(&tid)),
                wakeup_latency: wakee.last_wakeup.map(|wakeup| ts - wakeup),
            };
            notifications.publish(&Notification::SchedSwitchPerCpu(switch));
            notifications.publish(&Notification::SchedSwitchPerTid(switch));
        }

        let wakee = state.process_mut(next_tid);
        wakee.last_wakeup = None;
        wakee.last_waker = None;
    }

    fn sched_migrate_task(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(tid) = event.get_i64("tid") else {
            return;
        };

        let proc = state.tids.entry(tid).or_insert_with(|| Process {
            comm: event.get_str("comm").unwrap_or_default().to_string(),
            ..Process::new(tid)
        });
        proc.migrate_count += 1;

        if let Some(proc) = state.tids.get(&tid) {
            state.notifications.publish(&Notification::SchedMigrateTask {
                proc,
                cpu_id: event.cpu_id(),
                dest_cpu: get_cpu(event, "dest_cpu"),
            });
        }

        if let Some(prio) = event.get_i64("prio") {
            check_prio_changed(state, event.timestamp(), tid, prio);
        }
    }

    fn sched_wakeup(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(tid) = event.get_i64("tid") else {
            return;
        };
        let ts = event.timestamp();
        let current_cpu = event.cpu_id();

        if let Some(target_cpu) = get_cpu(event, "target_cpu") {
            state.cpu_mut(target_cpu);
        }
        if let Some(cpu_id) = current_cpu {
            state.cpu_mut(cpu_id);
        }

        if state.cpus.values().any(|cpu| cpu.current_tid == Some(tid)) {
            tracing::trace!("Ignoring wakeup of running thread {} at {}", tid, ts);
            return;
        }

        state.process_mut(tid);
        if let Some(mut prio) = event.get_i64("prio") {
            if state.prio_offset_fix {
                prio -= 100;
            }
            check_prio_changed(state, ts, tid, prio);
        }

        let waker = current_cpu.and_then(|cpu_id| state.current_tid(cpu_id));
        let proc = state.process_mut(tid);
        // Only the first wakeup before the switch counts for latency.
        if proc.last_wakeup.is_none() {
            proc.last_wakeup = Some(ts);
            if waker.is_some() {
                proc.last_waker = waker;
            }
        }
    }

    fn sched_process_fork(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(child_tid) = event.get_i64("child_tid") else {
            return;
        };
        let parent_pid = event.get_i64("parent_pid");
        let Some(parent_tid) = event.get_i64("parent_tid").or(parent_pid) else {
            return;
        };
        let ts = event.timestamp();

        let parent = state.process_mut(parent_tid);
        if parent_pid.is_some() {
            parent.pid = parent_pid;
        }
        if let Some(comm) = event.get_str("parent_comm") {
            parent.comm = comm.to_string();
        }

        let owner = state.fd_owner_tid(parent_tid);
        let fds: BTreeMap<i64, Fd> = state
            .tids
            .get(&owner)
            .map(|proc| {
                proc.fds
                    .values()
                    .map(|fd| (fd.fd, fd.duplicate()))
                    .collect()
            })
            .unwrap_or_default();
        let numbers: Vec<i64> = fds.keys().copied().collect();

        let child = Process {
            fds,
            ..Process::with_pid(
                child_tid,
                event.get_i64("child_pid").unwrap_or(child_tid),
                event.get_str("child_comm").unwrap_or_default(),
            )
        };
        tracing::debug!("Fork {} -> {}, {} FDs cloned", parent_tid, child_tid, numbers.len());
        state.tids.insert(child_tid, child);

        for fd in numbers {
            notify_fd(state, FdChangeKind::Create, child_tid, fd, ts, event.cpu_id());
        }
    }

    fn sched_process_exec(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(tid) = event.get_i64("tid") else {
            return;
        };
        let ts = event.timestamp();

        let comm = event
            .context_field("procname")
            .and_then(|v| v.as_str())
            .or_else(|| {
                event
                    .get_str("filename")
                    .map(|path| path.rsplit('/').next().unwrap_or(path))
            });
        let proc = state.process_mut(tid);
        if let Some(comm) = comm {
            proc.comm = comm.to_string();
        }

        let owner = state.fd_owner_tid(tid);
        let cloexec: Vec<i64> = state
            .tids
            .get(&owner)
            .map(|proc| {
                proc.fds
                    .values()
                    .filter(|fd| fd.cloexec)
                    .map(|fd| fd.fd)
                    .collect()
            })
            .unwrap_or_default();
        for fd in cloexec {
            close_fd(state, owner, fd, ts, event.cpu_id());
        }
    }

    fn sched_pi_setprio(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let (Some(tid), Some(prio)) = (event.get_i64("tid"), event.get_i64("newprio")) {
            check_prio_changed(state, event.timestamp(), tid, prio);
        }
    }
}

impl StateProvider for SchedProvider {
    fn name(&self) -> &'static str {
        "sched"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}
