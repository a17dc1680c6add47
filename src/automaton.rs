//! Event dispatch.
//!
//! The [`Automaton`] owns the [`State`] and hands every event to each state
//! provider in a fixed order: scheduler, memory, IRQ, syscall, I/O,
//! statedump, block, net. Later providers rely on what earlier ones did for
//! the same event, e.g. the I/O provider finds the syscall the syscall
//! provider just attached.

use anyhow::{Context, Result};

use crate::config::AutomatonConfig;
use crate::event::TraceEvent;
use crate::notify::{Notification, NotificationKind};
use crate::provider::{
    BlockProvider, IoProvider, IrqProvider, MemProvider, NetProvider, SchedProvider,
    StateProvider, StatedumpProvider, SyscallProvider,
};
use crate::state::State;

pub struct Automaton {
    state: State,
    providers: Vec<Box<dyn StateProvider>>,
    processed: u64,
}

impl Default for Automaton {
    fn default() -> Self {
        Self::new()
    }
}

impl Automaton {
    pub fn new() -> Self {
        Self::from_state(State::new())
    }

    pub fn with_config(config: &AutomatonConfig) -> Self {
        if let Some(version) = &config.tracer_version {
            tracing::debug!("Tracer version {}", version);
        }
        Self::from_state(State::with_config(config))
    }

    fn from_state(state: State) -> Self {
        let providers: Vec<Box<dyn StateProvider>> = vec![
            Box::new(SchedProvider::new()),
            Box::new(MemProvider::new()),
            Box::new(IrqProvider::new()),
            Box::new(SyscallProvider::new()),
            Box::new(IoProvider::new()),
            Box::new(StatedumpProvider::new()),
            Box::new(BlockProvider::new()),
            Box::new(NetProvider::new()),
        ];
        Self {
            state,
            providers,
            processed: 0,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Names of the installed providers, in dispatch order.
    pub fn providers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.iter().map(|provider| provider.name())
    }

    pub fn events_processed(&self) -> u64 {
        self.processed
    }

    /// Subscribe to a notification. See [`State::register`].
    pub fn register<F>(&mut self, kind: NotificationKind, callback: F)
    where
        F: FnMut(&Notification<'_>) + 'static,
    {
        self.state.register(kind, callback);
    }

    pub fn register_by_name<F>(&mut self, name: &str, callback: F) -> Result<()>
    where
        F: FnMut(&Notification<'_>) + 'static,
    {
        self.state
            .register_by_name(name, callback)
            .with_context(|| format!("Failed to register for '{name}'"))
    }

    /// Apply one event to the state.
    pub fn process(&mut self, event: &dyn TraceEvent) {
        for provider in self.providers.iter_mut() {
            provider.process_event(&mut self.state, event);
        }
        self.processed += 1;
    }

    /// Apply every event of an in-order stream.
    pub fn run<I, E>(&mut self, events: I)
    where
        I: IntoIterator<Item = E>,
        E: TraceEvent,
    {
        for event in events {
            self.process(&event);
        }
    }

    /// Like [`Automaton::run`], for readers that can fail. Stops at the
    /// first error; the events before it have been applied.
    pub fn try_run<I, E>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<E>>,
        E: TraceEvent,
    {
        for event in events {
            let event = event
                .with_context(|| format!("Failed to read event {}", self.processed + 1))?;
            self.process(&event);
        }
        Ok(())
    }

    /// End of trace: log what was left unpaired and hand back the state.
    pub fn finish(self) -> State {
        let state = self.state;
        let orphaned_block = state.orphaned_block_requests().count();
        let in_flight = state.in_flight_syscalls().count();
        let pending_irqs = state.pending_hard_irqs().count();

        tracing::info!(
            "Processed {} events: {} processes, {} CPUs, {} disks",
            self.processed,
            state.processes().len(),
            state.cpus().len(),
            state.disks().len()
        );
        if orphaned_block > 0 {
            tracing::warn!("{} block requests never completed", orphaned_block);
        }
        if in_flight > 0 {
            tracing::warn!("{} syscalls still in flight", in_flight);
            for (tid, syscall) in state.in_flight_syscalls() {
                tracing::debug!(
                    "tid {} in {} since {}",
                    tid,
                    syscall.name,
                    syscall.begin_ts
                );
            }
        }
        if pending_irqs > 0 {
            tracing::warn!("{} hard IRQs never exited", pending_irqs);
        }
        state
    }
}
