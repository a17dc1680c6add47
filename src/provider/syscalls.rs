use crate::event::TraceEvent;
use crate::notify::Notification;
use crate::provider::{HandlerTable, StateProvider, SYSCALL_ENTRY, SYSCALL_EXIT};
use crate::state::request::{syscall_name, SyscallClass};
use crate::state::{State, SyscallEvent};

/// Attaches the in-flight syscall to the running thread.
///
/// I/O syscalls stay attached after the exit so the I/O provider, which runs
/// next, can finish them.
pub struct SyscallProvider {
    handlers: HandlerTable<Self>,
}

impl Default for SyscallProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                (SYSCALL_ENTRY, Self::syscall_entry),
                (SYSCALL_EXIT, Self::syscall_exit),
            ]),
        }
    }

    fn syscall_entry(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(cpu_id) = event.cpu_id() else {
            return;
        };
        let Some(tid) = state.current_tid(cpu_id) else {
            tracing::trace!("Syscall {} on idle CPU {}", event.name(), cpu_id);
            return;
        };
        let name = syscall_name(event.name());
        state.process_mut(tid).current_syscall = Some(SyscallEvent::new(name, event.timestamp()));
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
        let Some(syscall) = proc.current_syscall.as_mut() else {
            tracing::trace!("Syscall exit without entry for tid {}", tid);
            return;
        };
        syscall.finish(event.timestamp(), event.get_i64("ret"));
        let is_io = SyscallClass::is_io(&syscall.name);

        if let Some(proc) = state.tids.get(&tid) {
            if let Some(syscall) = proc.current_syscall.as_ref() {
                state.notifications.publish(&Notification::SyscallExit {
                    proc,
                    syscall,
                    cpu_id,
                });
            }
        }

        if !is_io {
            if let Some(proc) = state.tids.get_mut(&tid) {
                proc.current_syscall = None;
            }
        }
    }
}

impl StateProvider for SyscallProvider {
    fn name(&self) -> &'static str {
        "syscalls"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}
