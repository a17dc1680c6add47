use crate::event::TraceEvent;
use crate::notify::Notification;
use crate::provider::{current_io_rq, current_tid, HandlerTable, StateProvider};
use crate::state::request::SyscallClass;
use crate::state::{FdType, IoRequestKind, State};

/// Interface traffic, and the FD type guess for writes that end up on a NIC.
pub struct NetProvider {
    handlers: HandlerTable<Self>,
}

impl Default for NetProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NetProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                ("net_dev_xmit", Self::net_dev_xmit),
                ("netif_receive_skb", Self::netif_receive_skb),
            ]),
        }
    }

    fn net_dev_xmit(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(iface_name) = event.get_str("name") else {
            return;
        };
        let sent_bytes = event.get_u64("len").unwrap_or(0);

        let iface = state.iface_mut(iface_name);
        iface.sent_bytes = iface.sent_bytes.saturating_add(sent_bytes);
        iface.sent_packets = iface.sent_packets.saturating_add(1);

        state.notifications.publish(&Notification::NetDevXmit {
            iface_name,
            sent_bytes,
            cpu_id: event.cpu_id(),
        });

        Self::mark_maybe_net(state, event);
    }

    /// A packet leaving while the running thread is in a write syscall
    /// suggests the FD it writes to is a socket.
    fn mark_maybe_net(state: &mut State, event: &dyn TraceEvent) {
        let Some(tid) = current_tid(state, event) else {
            return;
        };
        let fd = match state
            .tids
            .get(&tid)
            .and_then(|proc| proc.current_syscall.as_ref())
        {
            Some(syscall) if SyscallClass::of(&syscall.name) == Some(SyscallClass::Write) => {
                syscall.io_rq.as_ref().and_then(|rq| rq.fd())
            }
            _ => None,
        };
        let Some(fd) = fd else {
            return;
        };

        let owner = state.fd_owner_tid(tid);
        if let Some(entry) = state
            .tids
            .get_mut(&owner)
            .and_then(|proc| proc.fds.get_mut(&fd))
        {
            if entry.fd_type == FdType::Unknown {
                entry.fd_type = FdType::MaybeNet;
            }
            return;
        }

        // Not created yet, let the exit handler apply it.
        if let Some(IoRequestKind::ReadWrite(rw)) =
            current_io_rq(state, tid).map(|rq| &mut rq.kind)
        {
            rw.fd_type_hint = Some(FdType::MaybeNet);
        }
    }

    fn netif_receive_skb(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(iface_name) = event.get_str("name") else {
            return;
        };
        let recv_bytes = event.get_u64("len").unwrap_or(0);

        let iface = state.iface_mut(iface_name);
        iface.recv_bytes = iface.recv_bytes.saturating_add(recv_bytes);
        iface.recv_packets = iface.recv_packets.saturating_add(1);

        state.notifications.publish(&Notification::NetifReceiveSkb {
            iface_name,
            recv_bytes,
            cpu_id: event.cpu_id(),
        });
    }
}

impl StateProvider for NetProvider {
    fn name(&self) -> &'static str {
        "net"
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
    use crate::event::Event;
    use crate::notify::NotificationKind;
    use crate::state::{Fd, IoOperation, IoRequest, Process, ReadWriteRequest, SyscallEvent};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn xmit(len: u64) -> Event {
        Event::new(10, "net_dev_xmit")
            .on_cpu(0)
            .with_field("name", "eth0")
            .with_field("len", len)
    }

    fn writing(state: &mut State, name: &str, fd: i64) {
        let rw = ReadWriteRequest::new(IoOperation::Write, Some(fd), Some(100));
        let mut syscall = SyscallEvent::new(name, 5);
        syscall.io_rq = Some(IoRequest::new(5, 10, name, IoRequestKind::ReadWrite(rw)));
        state.process_mut(10).current_syscall = Some(syscall);
    }

    #[test]
    fn test_iface_counters() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut state = State::new();
        {
            let sent = Rc::clone(&sent);
            state.register(NotificationKind::NetDevXmit, move |n| {
                if let Notification::NetDevXmit {
                    iface_name,
                    sent_bytes,
                    ..
                } = n
                {
                    sent.borrow_mut().push((iface_name.to_string(), *sent_bytes));
                }
            });
        }
        let mut provider = NetProvider::new();
        provider.process_event(&mut state, &xmit(1500));
        provider.process_event(&mut state, &xmit(60));
        provider.process_event(
            &mut state,
            &Event::new(11, "netif_receive_skb")
                .with_field("name", "eth0")
                .with_field("len", 90u64),
        );

        let iface = state.iface("eth0").unwrap();
        assert_eq!(iface.sent_bytes, 1560);
        assert_eq!(iface.sent_packets, 2);
        assert_eq!(iface.recv_bytes, 90);
        assert_eq!(iface.recv_packets, 1);
        assert_eq!(
            *sent.borrow(),
            vec![("eth0".to_string(), 1500), ("eth0".to_string(), 60)]
        );
    }

    #[test]
    fn test_iface_counters_saturate() {
        let mut state = State::new();
        let mut provider = NetProvider::new();
        provider.process_event(&mut state, &xmit(u64::MAX));
        provider.process_event(&mut state, &xmit(u64::MAX));
        for _ in 0..2 {
            provider.process_event(
                &mut state,
                &Event::new(11, "netif_receive_skb")
                    .with_field("name", "eth0")
                    .with_field("len", u64::MAX),
            );
        }

        let iface = state.iface("eth0").unwrap();
        assert_eq!(iface.sent_bytes, u64::MAX);
        assert_eq!(iface.recv_bytes, u64::MAX);
        assert_eq!(iface.sent_packets, 2);
    }

    #[test]
    fn test_write_fd_marked_maybe_net() {
        let mut state = State::new();
        state.cpu_mut(0).current_tid = Some(10);
        let mut proc = Process::with_pid(10, 10, "curl");
        proc.fds.insert(3, Fd::new(3));
        state.tids.insert(10, proc);
        writing(&mut state, "write", 3);

        NetProvider::new().process_event(&mut state, &xmit(100));
        assert_eq!(state.fd(10, 3).unwrap().fd_type, FdType::MaybeNet);
    }

    #[test]
    fn test_hint_for_unknown_fd() {
        let mut state = State::new();
        state.cpu_mut(0).current_tid = Some(10);
        writing(&mut state, "sendto", 9);

        NetProvider::new().process_event(&mut state, &xmit(100));
        let syscall = state.process(10).unwrap().current_syscall.as_ref().unwrap();
        match &syscall.io_rq.as_ref().unwrap().kind {
            IoRequestKind::ReadWrite(rw) => assert_eq!(rw.fd_type_hint, Some(FdType::MaybeNet)),
            other => panic!("unexpected request {other:?}"),
        }
    }

    #[test]
    fn test_reads_not_marked() {
        let mut state = State::new();
        state.cpu_mut(0).current_tid = Some(10);
        let mut proc = Process::with_pid(10, 10, "cat");
        proc.fds.insert(3, Fd::new(3));
        state.tids.insert(10, proc);
        writing(&mut state, "read", 3);

        NetProvider::new().process_event(&mut state, &xmit(100));
        assert_eq!(state.fd(10, 3).unwrap().fd_type, FdType::Unknown);
    }
}
