use crate::event::TraceEvent;
use crate::notify::Notification;
use crate::provider::{HandlerTable, StateProvider};
use crate::state::State;

/// Hard and soft interrupt pairing, per CPU.
pub struct IrqProvider {
    handlers: HandlerTable<Self>,
}

impl Default for IrqProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                ("irq_handler_entry", Self::irq_handler_entry),
                ("irq_handler_exit", Self::irq_handler_exit),
                ("softirq_raise", Self::softirq_raise),
                ("softirq_entry", Self::softirq_entry),
                ("softirq_exit", Self::softirq_exit),
            ]),
        }
    }

    fn irq_handler_entry(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(cpu_id), Some(id)) = (event.cpu_id(), event.get_i64("irq")) else {
            return;
        };
        state.cpu_mut(cpu_id).enter_hard_irq(id, event.timestamp());
        state.notifications.publish(&Notification::IrqHandlerEntry {
            id,
            irq_name: event.get_str("name"),
            cpu_id,
        });
    }

    fn irq_handler_exit(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let Some(cpu_id) = event.cpu_id() else {
            return;
        };
        let cpu = state.cpu_mut(cpu_id);
        let Some(id) = event.get_i64("irq") else {
            cpu.current_hard_irq = None;
            return;
        };

        match cpu.exit_hard_irq(id, event.timestamp(), event.get_i64("ret")) {
            Some(hard_irq) => state
                .notifications
                .publish(&Notification::IrqHandlerExit {
                    hard_irq: &hard_irq,
                }),
            None => tracing::trace!(
                "Dropping irq_handler_exit for irq {} on CPU {} at {}",
                id,
                cpu_id,
                event.timestamp()
            ),
        }
    }

    fn softirq_raise(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(cpu_id), Some(vec)) = (event.cpu_id(), event.get_i64("vec")) else {
            return;
        };
        if !state.cpu_mut(cpu_id).raise_softirq(vec, event.timestamp()) {
            tracing::trace!("Coalescing softirq {} raise on CPU {}", vec, cpu_id);
        }
    }

    fn softirq_entry(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(cpu_id), Some(vec)) = (event.cpu_id(), event.get_i64("vec")) else {
            return;
        };
        state.cpu_mut(cpu_id).enter_softirq(vec, event.timestamp());
    }

    fn softirq_exit(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(cpu_id), Some(vec)) = (event.cpu_id(), event.get_i64("vec")) else {
            return;
        };
        match state.cpu_mut(cpu_id).exit_softirq(vec, event.timestamp()) {
            Some(softirq) => state
                .notifications
                .publish(&Notification::SoftirqExit { softirq: &softirq }),
            None => tracing::trace!("Dropping softirq_exit for vec {} on CPU {}", vec, cpu_id),
        }
    }
}

impl StateProvider for IrqProvider {
    fn name(&self) -> &'static str {
        "irq"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}
