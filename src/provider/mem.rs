use crate::event::TraceEvent;
use crate::notify::Notification;
use crate::provider::{current_tid, HandlerTable, StateProvider};
use crate::state::State;

/// Global page accounting and per-thread page notifications.
pub struct MemProvider {
    handlers: HandlerTable<Self>,
}

impl Default for MemProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                ("mm_page_alloc", Self::page_alloc),
                ("kmem_mm_page_alloc", Self::page_alloc),
                ("mm_page_free", Self::page_free),
                ("kmem_mm_page_free", Self::page_free),
            ]),
        }
    }

    fn page_alloc(&mut self, state: &mut State, event: &dyn TraceEvent) {
        state.mm.page_count = state.mm.page_count.saturating_add(1);

        for rq in state
            .tids
            .values_mut()
            .filter_map(|proc| proc.current_syscall.as_mut()?.io_rq.as_mut())
        {
            rq.pages_allocated = rq.pages_allocated.saturating_add(1);
        }

        let (Some(cpu_id), Some(tid)) = (event.cpu_id(), current_tid(state, event)) else {
            return;
        };
        if let Some(proc) = state.tids.get(&tid) {
            state
                .notifications
                .publish(&Notification::TidPageAlloc { proc, cpu_id });
        }
    }

    fn page_free(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if state.mm.page_count == 0 {
            return;
        }
        state.mm.page_count -= 1;

        let (Some(cpu_id), Some(tid)) = (event.cpu_id(), current_tid(state, event)) else {
            return;
        };
        if let Some(proc) = state.tids.get(&tid) {
            state
                .notifications
                .publish(&Notification::TidPageFree { proc, cpu_id });
        }
    }
}

impl StateProvider for MemProvider {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}
