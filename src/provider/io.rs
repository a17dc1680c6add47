//! I/O syscall classification and FD lifecycle.
//!
//! On entry an I/O syscall is turned into an [`IoRequest`] and attached to the
//! thread's current syscall. On exit the request is finished, its side
//! effects are applied to the FD table of the owning process, and it is
//! published as `io_rq_exit` whether it succeeded or not.

use crate::abi::{has_cloexec, AF_INET, EINPROGRESS, F_DUPFD, F_DUPFD_CLOEXEC};
use crate::event::{FieldValue, TraceEvent};
use crate::notify::Notification;
use crate::provider::{
    close_fd, current_io_rq, current_tid, ensure_fd, notify_fd, FdChangeKind, HandlerTable,
    StateProvider, SYSCALL_ENTRY, SYSCALL_EXIT,
};
use crate::state::request::{syscall_name, SyscallClass};
use crate::state::{
    CpuId, Fd, FdType, IoOperation, IoRequest, IoRequestKind, OpenRequest, Process,
    ReadWriteRequest, State, Tid,
};

/// Turns I/O syscalls into requests and keeps FD tables in step with them.
pub struct IoProvider {
    handlers: HandlerTable<Self>,
}

impl Default for IoProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// `ip:port` for an AF_INET payload, from `v4addr` and the given port field.
fn inet_address(event: &dyn TraceEvent, port_field: &str) -> Option<String> {
    if event.get_i64("family") != Some(AF_INET) {
        return None;
    }
    let addr = event.field("v4addr").and_then(FieldValue::as_ipv4)?;
    let port = event.get_i64(port_field)?;
    Some(format!("{addr}:{port}"))
}

impl IoProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                (SYSCALL_ENTRY, Self::syscall_entry),
                (SYSCALL_EXIT, Self::syscall_exit),
                ("writeback_pages_written", Self::writeback_pages_written),
                ("mm_vmscan_wakeup_kswapd", Self::mm_vmscan_wakeup_kswapd),
                ("mm_page_free", Self::mm_page_free),
            ]),
        }
    }

    fn syscall_entry(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let name = syscall_name(event.name());
        let Some(class) = SyscallClass::of(name) else {
            return;
        };
        let Some(tid) = current_tid(state, event) else {
            return;
        };

        Self::fix_context_pid(state, event, tid);

        let kind = match class {
            SyscallClass::DiskOpen => {
                let mut open = OpenRequest::new(
                    event.get_str("filename").unwrap_or("unknown"),
                    FdType::Disk,
                );
                open.cloexec = event.get_i64("flags").is_some_and(has_cloexec);
                Some(IoRequestKind::Open(open))
            }
            SyscallClass::Accept => {
                let filename = inet_address(event, "sport").unwrap_or_else(|| "socket".into());
                let mut open = OpenRequest::new(filename, FdType::Net);
                open.family = event.get_i64("family");
                Some(IoRequestKind::Open(open))
            }
            SyscallClass::Socket => {
                let family = event.get_i64("family");
                let mut open = OpenRequest::new("socket", FdType::from_socket_family(family));
                open.family = family;
                Some(IoRequestKind::Open(open))
            }
            SyscallClass::Dup => Self::dup_request(state, event, name, tid),
            SyscallClass::Close => event
                .get_i64("fd")
                .map(|fd| IoRequestKind::Close { fd }),
            SyscallClass::Read | SyscallClass::Write => {
                let operation = if class == SyscallClass::Read {
                    IoOperation::Read
                } else {
                    IoOperation::Write
                };
                // recvmsg and sendmsg only know their size on exit.
                let size_field = match name {
                    "readv" | "preadv" | "writev" | "pwritev" => Some("vlen"),
                    "recvfrom" => Some("size"),
                    "sendto" => Some("len"),
                    "recvmsg" | "sendmsg" => None,
                    _ => Some("count"),
                };
                let size = size_field.and_then(|field| event.get_u64(field));
                Some(IoRequestKind::ReadWrite(ReadWriteRequest::new(
                    operation,
                    event.get_i64("fd"),
                    size,
                )))
            }
            SyscallClass::ReadWrite => {
                let rw = if name == "splice" {
                    ReadWriteRequest::splice(
                        event.get_i64("fd_in"),
                        event.get_i64("fd_out"),
                        event.get_u64("len"),
                    )
                } else {
                    ReadWriteRequest::splice(
                        event.get_i64("in_fd"),
                        event.get_i64("out_fd"),
                        event.get_u64("count"),
                    )
                };
                Some(IoRequestKind::ReadWrite(rw))
            }
            SyscallClass::Sync => Some(match name {
                "sync" => IoRequestKind::Sync {
                    fd: None,
                    size: None,
                },
                "sync_file_range" => IoRequestKind::Sync {
                    fd: event.get_i64("fd"),
                    size: event.get_u64("nbytes"),
                },
                _ => IoRequestKind::Sync {
                    fd: event.get_i64("fd"),
                    size: None,
                },
            }),
            SyscallClass::Connect => event.get_i64("fd").map(|fd| IoRequestKind::Connect {
                fd,
                address: inet_address(event, "dport"),
            }),
        };

        let Some(kind) = kind else {
            return;
        };
        let rq = IoRequest::new(event.timestamp(), tid, name, kind);
        match state
            .tids
            .get_mut(&tid)
            .and_then(|proc| proc.current_syscall.as_mut())
        {
            Some(syscall) => syscall.io_rq = Some(rq),
            None => tracing::trace!("No syscall attached to tid {} for {}", tid, name),
        }
    }

    /// dup, dup2, dup3 and fcntl(F_DUPFD*) open a copy of an existing FD.
    /// dup2 and dup3 close the destination first.
    fn dup_request(
        state: &mut State,
        event: &dyn TraceEvent,
        name: &str,
        tid: Tid,
    ) -> Option<IoRequestKind> {
        let owner = state.fd_owner_tid(tid);
        let (oldfd, newfd, cloexec) = match name {
            "dup" => (event.get_i64("fildes")?, None, false),
            "dup2" => (event.get_i64("oldfd")?, event.get_i64("newfd"), false),
            "dup3" => (
                event.get_i64("oldfd")?,
                event.get_i64("newfd"),
                event.get_i64("flags").is_some_and(has_cloexec),
            ),
            "fcntl" => match event.get_i64("cmd")? {
                F_DUPFD => (event.get_i64("fd")?, None, false),
                F_DUPFD_CLOEXEC => (event.get_i64("fd")?, None, true),
                _ => return None,
            },
            _ => return None,
        };

        let mut open = match state.tids.get(&owner).and_then(|proc| proc.fds.get(&oldfd)) {
            Some(old) => {
                let mut open = OpenRequest::new(old.filename.clone(), old.fd_type);
                open.family = old.family;
                open
            }
            None => OpenRequest::new("unknown", FdType::Unknown),
        };
        open.cloexec = cloexec;

        if let Some(newfd) = newfd.filter(|newfd| *newfd != oldfd) {
            close_fd(state, owner, newfd, event.timestamp(), event.cpu_id());
        }

        Some(IoRequestKind::Open(open))
    }

    fn syscall_exit(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(cpu_id) = event.cpu_id() else {
            return;
        };
        let Some(tid) = state.current_tid(cpu_id) else {
            return;
        };
        let Some(proc) = state.tids.get_mut(&tid) else {
            return;
        };
        if !proc
            .current_syscall
            .as_ref()
            .is_some_and(|syscall| SyscallClass::is_io(&syscall.name))
        {
            return;
        }
        // Detached here; the syscall provider left it for us.
        let Some(mut rq) = proc.current_syscall.take().and_then(|syscall| syscall.io_rq) else {
            return;
        };

        let ts = event.timestamp();
        let ret = event.get_i64("ret");
        rq.finish(ts, ret);

        let success = match ret {
            Some(ret) if ret >= 0 => true,
            // Non-blocking connect.
            Some(ret) => ret == -EINPROGRESS && rq.operation() == IoOperation::Connect,
            None => false,
        };

        let owner = state.fd_owner_tid(tid);
        if success {
            Self::apply_exit(state, &rq, tid, owner, cpu_id);
        }

        if let (Some(proc), Some(parent_proc)) = (state.tids.get(&tid), state.tids.get(&owner)) {
            state.notifications.publish(&Notification::IoRqExit {
                io_rq: &rq,
                proc,
                parent_proc,
            });
        }

        if let IoRequestKind::Close { fd } = rq.kind {
            if ret == Some(0) {
                close_fd(state, owner, fd, ts, Some(cpu_id));
            }
        }
    }

    /// FD side effects of a successful request.
    fn apply_exit(state: &mut State, rq: &IoRequest, tid: Tid, owner: Tid, cpu_id: CpuId) {
        let ts = rq.end_ts.unwrap_or(rq.begin_ts);
        let cpu = Some(cpu_id);

        match &rq.kind {
            IoRequestKind::Open(open) => {
                if let Some(fd) = open.fd {
                    ensure_fd(state, owner, Fd::from_open_request(fd, open), ts, cpu);
                }
            }
            IoRequestKind::ReadWrite(rw) => {
                for fd in [rw.fd, rw.fd_in, rw.fd_out].into_iter().flatten() {
                    ensure_fd(state, owner, Fd::new(fd), ts, cpu);
                }
                Self::account_read_write(state, rw, tid, owner);
            }
            IoRequestKind::Sync { fd: Some(fd), .. } => {
                ensure_fd(state, owner, Fd::new(*fd), ts, cpu);
            }
            // Only names a socket we already know about.
            IoRequestKind::Connect { fd, address } => {
                if let Some(address) = address {
                    if let Some(entry) = state
                        .tids
                        .get_mut(&owner)
                        .and_then(|proc| proc.fds.get_mut(fd))
                    {
                        entry.filename = address.clone();
                        notify_fd(state, FdChangeKind::Update, owner, *fd, ts, cpu);
                    }
                }
            }
            IoRequestKind::Sync { fd: None, .. } | IoRequestKind::Close { .. } => {}
        }
    }

    /// Attribute the returned bytes to the FDs and to the issuing thread.
    fn account_read_write(state: &mut State, rw: &ReadWriteRequest, tid: Tid, owner: Tid) {
        let Some(bytes) = rw.returned_size else {
            return;
        };
        let (reads, writes) = match rw.operation {
            IoOperation::Read => (rw.fd, None),
            IoOperation::Write => (None, rw.fd),
            _ => (rw.fd_in, rw.fd_out),
        };

        let mut types = (None, None);
        if let Some(proc) = state.tids.get_mut(&owner) {
            if let Some(fd) = reads.and_then(|fd| proc.fds.get_mut(&fd)) {
                fd.io.add_read(fd.fd_type, bytes);
                types.0 = Some(fd.fd_type);
            }
            if let Some(fd) = writes.and_then(|fd| proc.fds.get_mut(&fd)) {
                if fd.fd_type == FdType::Unknown {
                    if let Some(hint) = rw.fd_type_hint {
                        fd.fd_type = hint;
                    }
                }
                fd.io.add_write(fd.fd_type, bytes);
                types.1 = Some(fd.fd_type);
            }
        }

        if let Some(proc) = state.tids.get_mut(&tid) {
            if let Some(fd_type) = types.0 {
                proc.io.add_read(fd_type, bytes);
            }
            if let Some(fd_type) = types.1 {
                proc.io.add_write(fd_type, bytes);
            }
        }
    }

    /// Some tracers only give the pid as a stream context. Use it when the
    /// thread's pid is still unknown.
    fn fix_context_pid(state: &mut State, event: &dyn TraceEvent, tid: Tid) {
        // A payload field of the same name would shadow it.
        if event.field("pid").is_some() {
            return;
        }
        let Some(pid) = event.context_field("pid").and_then(FieldValue::as_i64) else {
            return;
        };
        let proc = state.process_mut(tid);
        if proc.pid.is_some() {
            return;
        }
        proc.pid = Some(pid);
        if pid != tid {
            let comm = proc.comm.clone();
            state.tids.entry(pid).or_insert_with(|| {
                tracing::debug!("Creating leader {} of thread {} from context", pid, tid);
                Process::with_pid(pid, pid, &comm)
            });
        }
    }

    fn running_tids(state: &State) -> Vec<Tid> {
        state.cpus.values().filter_map(|cpu| cpu.current_tid).collect()
    }

    fn writeback_pages_written(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(pages) = event.get_u64("pages") else {
            return;
        };
        for tid in Self::running_tids(state) {
            if let Some(rq) = current_io_rq(state, tid) {
                rq.pages_written = rq.pages_written.saturating_add(pages);
            }
        }
    }

    fn mm_vmscan_wakeup_kswapd(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(tid) = current_tid(state, event) {
            if let Some(rq) = current_io_rq(state, tid) {
                rq.woke_kswapd = true;
            }
        }
    }

    fn mm_page_free(&mut self, state: &mut State, _event: &dyn TraceEvent) {
        for tid in Self::running_tids(state) {
            // Pages freed by kswapd are charged to whoever woke it.
            let tid = match state.tids.get(&tid) {
                Some(proc) if proc.comm == "kswapd0" => match proc.prev_tid {
                    Some(prev) if prev > 0 => prev,
                    _ => tid,
                },
                _ => tid,
            };
            if let Some(rq) = current_io_rq(state, tid) {
                if rq.woke_kswapd {
                    rq.pages_freed = rq.pages_freed.saturating_add(1);
                }
            }
        }
    }
}

impl StateProvider for IoProvider {
    fn name(&self) -> &'static str {
        "io"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{AF_INET6, AF_UNIX, O_CLOEXEC};
    use crate::event::Event;
    use crate::notify::NotificationKind;
    use crate::provider::SyscallProvider;
    use crate::state::SyscallEvent;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Runs the syscall provider before the I/O provider, like the automaton.
    struct Harness {
        state: State,
        syscalls: SyscallProvider,
        io: IoProvider,
    }

    impl Harness {
        fn new() -> Self {
            let mut state = State::new();
            state.cpu_mut(0).current_tid = Some(10);
            state.tids.insert(10, Process::with_pid(10, 10, "app"));
            Self {
                state,
                syscalls: SyscallProvider::new(),
                io: IoProvider::new(),
            }
        }

        fn feed(&mut self, event: Event) {
            let event = event.on_cpu(0);
            self.syscalls.process_event(&mut self.state, &event);
            self.io.process_event(&mut self.state, &event);
        }

        fn exit(&mut self, ts: i64, ret: i64) {
            self.feed(Event::new(ts, "exit_syscall").with_field("ret", ret));
        }

        fn fd(&self, fd: i64) -> Option<&Fd> {
            self.state.fd(10, fd)
        }

        fn record(&mut self, kind: NotificationKind) -> Rc<RefCell<Vec<i64>>> {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            self.state.register(kind, move |n| match n {
                Notification::CreateFd(c) | Notification::UpdateFd(c) | Notification::CloseFd(c) => {
                    sink.borrow_mut().push(c.fd.fd)
                }
                Notification::IoRqExit { io_rq, .. } => {
                    sink.borrow_mut().push(io_rq.errno.unwrap_or(0))
                }
                _ => {}
            });
            seen
        }
    }

    #[test]
    fn test_open_read_close() {
        let mut h = Harness::new();
        let closed = h.record(NotificationKind::CloseFd);

        h.feed(
            Event::new(5, "sys_open")
                .with_field("filename", "/tmp/x")
                .with_field("flags", O_CLOEXEC),
        );
        h.exit(8, 7);
        let fd = h.fd(7).unwrap();
        assert_eq!(fd.filename, "/tmp/x");
        assert_eq!(fd.fd_type, FdType::Disk);
        assert!(fd.cloexec);

        h.feed(
            Event::new(9, "sys_read")
                .with_field("fd", 7i64)
                .with_field("count", 100u64),
        );
        h.exit(20, 100);
        assert_eq!(h.fd(7).unwrap().io.read, 100);
        assert_eq!(h.fd(7).unwrap().io.disk_read, 100);
        assert_eq!(h.state.process(10).unwrap().io.read, 100);

        h.feed(Event::new(21, "sys_close").with_field("fd", 7i64));
        h.exit(22, 0);
        assert!(h.fd(7).is_none());
        assert_eq!(*closed.borrow(), vec![7]);
        assert!(h.state.process(10).unwrap().current_syscall.is_none());

        // Number reused: fresh counters.
        h.feed(Event::new(30, "sys_openat").with_field("filename", "/tmp/y"));
        h.exit(31, 7);
        assert_eq!(h.fd(7).unwrap().filename, "/tmp/y");
        assert_eq!(h.fd(7).unwrap().io.read, 0);
    }

    #[test]
    fn test_failed_requests_still_published() {
        let mut h = Harness::new();
        let exits = h.record(NotificationKind::IoRqExit);
        let created = h.record(NotificationKind::CreateFd);

        h.feed(Event::new(5, "sys_open").with_field("filename", "/missing"));
        h.exit(6, -2);
        h.feed(Event::new(7, "sys_close").with_field("fd", 3i64));
        h.exit(8, -9);

        assert_eq!(*exits.borrow(), vec![2, 9]);
        assert!(created.borrow().is_empty());
        assert!(h.state.process(10).unwrap().fds.is_empty());
    }

    #[test]
    fn test_read_on_unknown_fd_creates_it() {
        let mut h = Harness::new();
        let created = h.record(NotificationKind::CreateFd);
        h.feed(Event::new(5, "sys_recvmsg").with_field("fd", 4i64));
        h.exit(6, 64);
        let fd = h.fd(4).unwrap();
        assert_eq!(fd.filename, "unknown");
        assert_eq!(fd.io.unk_read, 64);
        assert_eq!(*created.borrow(), vec![4]);
    }

    #[test]
    fn test_socket_types() {
        let mut h = Harness::new();
        h.feed(Event::new(1, "sys_socket").with_field("family", AF_INET6));
        h.exit(2, 3);
        h.feed(Event::new(3, "sys_socket").with_field("family", AF_UNIX));
        h.exit(4, 4);
        assert_eq!(h.fd(3).unwrap().fd_type, FdType::Net);
        assert_eq!(h.fd(3).unwrap().family, Some(AF_INET6));
        assert_eq!(h.fd(4).unwrap().fd_type, FdType::Disk);
    }

    #[test]
    fn test_accept_inet_name() {
        let mut h = Harness::new();
        h.feed(
            Event::new(1, "syscall_entry_accept4")
                .with_field("family", AF_INET)
                .with_field("v4addr", [192u8, 168, 0, 7])
                .with_field("sport", 443i64),
        );
        h.exit(2, 5);
        assert_eq!(h.fd(5).unwrap().filename, "192.168.0.7:443");
        assert_eq!(h.fd(5).unwrap().fd_type, FdType::Net);
    }

    #[test]
    fn test_dup_family() {
        let mut h = Harness::new();
        h.feed(Event::new(1, "sys_open").with_field("filename", "/etc/hosts"));
        h.exit(2, 3);
        h.feed(Event::new(3, "sys_open").with_field("filename", "/dev/null"));
        h.exit(4, 4);
        let closed = h.record(NotificationKind::CloseFd);

        h.feed(Event::new(5, "sys_dup").with_field("fildes", 3i64));
        h.exit(6, 5);
        assert_eq!(h.fd(5).unwrap().filename, "/etc/hosts");

        h.feed(
            Event::new(7, "sys_dup3")
                .with_field("oldfd", 3i64)
                .with_field("newfd", 4i64)
                .with_field("flags", O_CLOEXEC),
        );
        h.exit(8, 4);
        assert_eq!(*closed.borrow(), vec![4]);
        assert_eq!(h.fd(4).unwrap().filename, "/etc/hosts");
        assert!(h.fd(4).unwrap().cloexec);

        h.feed(
            Event::new(9, "sys_fcntl")
                .with_field("fd", 3i64)
                .with_field("cmd", F_DUPFD_CLOEXEC),
        );
        h.exit(10, 6);
        assert!(h.fd(6).unwrap().cloexec);

        // F_GETFL does not open anything.
        h.feed(
            Event::new(11, "sys_fcntl")
                .with_field("fd", 3i64)
                .with_field("cmd", 3i64),
        );
        h.exit(12, 2);
        assert!(h.fd(2).is_none());
        assert!(h.state.process(10).unwrap().current_syscall.is_none());
    }

    #[test]
    fn test_splice_counts_both_sides() {
        let mut h = Harness::new();
        h.feed(
            Event::new(1, "sys_splice")
                .with_field("fd_in", 3i64)
                .with_field("fd_out", 4i64)
                .with_field("len", 4096u64),
        );
        h.exit(2, 1024);
        assert_eq!(h.fd(3).unwrap().io.read, 1024);
        assert_eq!(h.fd(4).unwrap().io.write, 1024);
    }

    #[test]
    fn test_connect_renames_socket() {
        let mut h = Harness::new();
        let updated = h.record(NotificationKind::UpdateFd);
        h.feed(Event::new(1, "sys_socket").with_field("family", AF_INET));
        h.exit(2, 3);
        h.feed(
            Event::new(3, "syscall_entry_connect")
                .with_field("fd", 3i64)
                .with_field("family", AF_INET)
                .with_field("v4addr", 0x0a00_0001u64)
                .with_field("dport", 80i64),
        );
        h.exit(4, -EINPROGRESS);
        assert_eq!(h.fd(3).unwrap().filename, "10.0.0.1:80");
        assert_eq!(*updated.borrow(), vec![3]);
    }

    #[test]
    fn test_connect_on_unknown_fd() {
        let mut h = Harness::new();
        let created = h.record(NotificationKind::CreateFd);
        let updated = h.record(NotificationKind::UpdateFd);
        h.feed(
            Event::new(1, "syscall_entry_connect")
                .with_field("fd", 9i64)
                .with_field("family", AF_INET)
                .with_field("v4addr", [10u8, 0, 0, 1])
                .with_field("dport", 80i64),
        );
        h.exit(2, 0);
        assert!(h.fd(9).is_none());
        assert!(h.state.process(10).unwrap().fds.is_empty());
        assert!(created.borrow().is_empty());
        assert!(updated.borrow().is_empty());
    }

    #[test]
    fn test_thread_uses_leader_table() {
        let mut h = Harness::new();
        h.state.tids.insert(11, Process::with_pid(11, 10, "app"));
        h.state.cpu_mut(0).current_tid = Some(11);
        h.feed(Event::new(1, "sys_open").with_field("filename", "/tmp/t"));
        h.exit(2, 3);
        assert!(h.state.process(11).unwrap().fds.is_empty());
        assert_eq!(h.state.process(10).unwrap().fds[&3].filename, "/tmp/t");
    }

    #[test]
    fn test_context_pid_creates_leader() {
        let mut h = Harness::new();
        h.state.tids.insert(21, Process::new(21));
        h.state.cpu_mut(0).current_tid = Some(21);
        h.feed(
            Event::new(1, "sys_open")
                .with_context("pid", 20i64)
                .with_field("filename", "/tmp/c"),
        );
        assert_eq!(h.state.process(21).unwrap().pid, Some(20));
        assert_eq!(h.state.process(20).unwrap().pid, Some(20));
        h.exit(2, 3);
        assert!(h.state.process(20).unwrap().fds.contains_key(&3));
    }

    #[test]
    fn test_memory_pressure_attribution() {
        let mut h = Harness::new();
        h.feed(
            Event::new(1, "sys_write")
                .with_field("fd", 3i64)
                .with_field("count", 10u64),
        );
        h.feed(Event::new(2, "writeback_pages_written").with_field("pages", 4u64));
        h.feed(Event::new(3, "mm_vmscan_wakeup_kswapd"));

        // kswapd runs on CPU 1 and frees pages for tid 10.
        let mut kswapd = Process::with_pid(50, 50, "kswapd0");
        kswapd.prev_tid = Some(10);
        h.state.tids.insert(50, kswapd);
        h.state.cpu_mut(1).current_tid = Some(50);
        let free = Event::new(4, "mm_page_free").on_cpu(1);
        h.io.process_event(&mut h.state, &free);
        h.io.process_event(&mut h.state, &free);

        let syscall: &SyscallEvent = h
            .state
            .process(10)
            .unwrap()
            .current_syscall
            .as_ref()
            .unwrap();
        let rq = syscall.io_rq.as_ref().unwrap();
        assert_eq!(rq.pages_written, 4);
        assert!(rq.woke_kswapd);
        // Charged once through kswapd and once as tid 10 itself on CPU 0.
        assert_eq!(rq.pages_freed, 4);
    }

    #[test]
    fn test_pages_written_saturate() {
        let mut h = Harness::new();
        h.feed(
            Event::new(1, "sys_write")
                .with_field("fd", 3i64)
                .with_field("count", 10u64),
        );
        h.feed(Event::new(2, "writeback_pages_written").with_field("pages", u64::MAX));
        h.feed(Event::new(3, "writeback_pages_written").with_field("pages", u64::MAX));
        h.feed(Event::new(4, "writeback_pages_written").with_field("pages", 2u64));

        let rq = h
            .state
            .process(10)
            .and_then(|proc| proc.current_syscall.as_ref())
            .and_then(|syscall| syscall.io_rq.as_ref())
            .unwrap();
        assert_eq!(rq.pages_written, u64::MAX);

        h.exit(5, 10);
        assert_eq!(h.fd(3).unwrap().io.write, 10);
    }
}
