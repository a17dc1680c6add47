//! Common test utilities for kstate integration tests.

use std::cell::RefCell;
use std::rc::Rc;

use kstate::{Automaton, Event, Notification, NotificationKind};

pub fn sched_switch(ts: i64, cpu: u32, prev_tid: i64, next_tid: i64, next_comm: &str) -> Event {
    Event::new(ts, "sched_switch")
        .on_cpu(cpu)
        .with_field("prev_tid", prev_tid)
        .with_field("next_tid", next_tid)
        .with_field("next_comm", next_comm)
}

pub fn syscall_entry(ts: i64, cpu: u32, name: &str) -> Event {
    Event::new(ts, format!("syscall_entry_{name}")).on_cpu(cpu)
}

pub fn syscall_exit(ts: i64, cpu: u32, name: &str, ret: i64) -> Event {
    Event::new(ts, format!("syscall_exit_{name}"))
        .on_cpu(cpu)
        .with_field("ret", ret)
}

pub fn block_rq(name: &str, ts: i64, dev: u64, sector: u64, nr_sector: u64) -> Event {
    Event::new(ts, name)
        .with_field("dev", dev)
        .with_field("sector", sector)
        .with_field("nr_sector", nr_sector)
        .with_field("rwbs", 0u64)
}

/// What a test saw published, as owned data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Seen {
    Switch { cpu: u32, prev: i64, next: i64 },
    BlockComplete { dev: u64, sector: u64, duration: Option<i64> },
    CreateFd { pid: i64, fd: i64, filename: String },
    CloseFd { pid: i64, fd: i64 },
    IoRqExit { tid: i64, syscall: String, size: Option<u64>, duration: Option<i64> },
    SoftirqExit { vec: i64, raise_ts: Option<i64>, begin_ts: Option<i64> },
    IrqExit { irq: i64, duration: Option<i64> },
}

/// Subscribe to `kinds` and collect what is published.
pub fn record(automaton: &mut Automaton, kinds: &[NotificationKind]) -> Rc<RefCell<Vec<Seen>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    for kind in kinds {
        let seen = Rc::clone(&seen);
        automaton.register(*kind, move |n| {
            let entry = match n {
                Notification::SchedSwitchPerCpu(s) => Seen::Switch {
                    cpu: s.cpu_id,
                    prev: s.prev_tid,
                    next: s.next_tid,
                },
                Notification::BlockRqComplete { req, .. } => Seen::BlockComplete {
                    dev: req.dev,
                    sector: req.sector,
                    duration: req.duration,
                },
                Notification::CreateFd(c) => Seen::CreateFd {
                    pid: c.parent_proc.tid,
                    fd: c.fd.fd,
                    filename: c.fd.filename.clone(),
                },
                Notification::CloseFd(c) => Seen::CloseFd {
                    pid: c.parent_proc.tid,
                    fd: c.fd.fd,
                },
                Notification::IoRqExit { io_rq, .. } => Seen::IoRqExit {
                    tid: io_rq.tid,
                    syscall: io_rq.syscall_name.clone(),
                    size: io_rq.size(),
                    duration: io_rq.duration,
                },
                Notification::SoftirqExit { softirq } => Seen::SoftirqExit {
                    vec: softirq.id,
                    raise_ts: softirq.raise_ts,
                    begin_ts: softirq.begin_ts,
                },
                Notification::IrqHandlerExit { hard_irq } => Seen::IrqExit {
                    irq: hard_irq.id,
                    duration: hard_irq.duration(),
                },
                _ => return,
            };
            seen.borrow_mut().push(entry);
        });
    }
    seen
}
