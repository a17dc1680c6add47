//! kstate - kernel state reconstruction from trace events.
//!
//! Feed a chronologically ordered stream of kernel trace events to an
//! [`Automaton`] and it maintains a model of the traced system: which thread
//! runs on each CPU, which FDs each process holds, which syscalls, block
//! requests and interrupts are in flight. Analyses subscribe to typed
//! [`Notification`]s published as requests complete.
//!
//! # Modules
//!
//! - [`event`] - the [`TraceEvent`] input interface and an owned [`Event`]
//! - [`state`] - the reconstructed [`State`]
//! - [`provider`] - per-subsystem event handlers
//! - [`notify`] - notification vocabulary and bus
//! - [`config`] - automaton configuration
//!
//! # Example
//!
//! ```
//! use kstate::{Automaton, Event, Notification, NotificationKind};
//!
//! let mut automaton = Automaton::new();
//! automaton.register(NotificationKind::SchedSwitchPerCpu, |n| {
//!     if let Notification::SchedSwitchPerCpu(switch) = n {
//!         println!("{} now runs {}", switch.cpu_id, switch.next_comm);
//!     }
//! });
//! automaton.process(
//!     &Event::new(100, "sched_switch")
//!         .on_cpu(0)
//!         .with_field("prev_tid", 0i64)
//!         .with_field("next_tid", 42i64)
//!         .with_field("next_comm", "bash"),
//! );
//! assert_eq!(automaton.state().cpu(0).unwrap().current_tid, Some(42));
//! ```

pub mod abi;
pub mod automaton;
pub mod config;
pub mod event;
pub mod notify;
pub mod provider;
pub mod state;

pub use automaton::Automaton;
pub use config::{AutomatonConfig, TracerVersion};
pub use event::{Event, FieldValue, TraceEvent};
pub use notify::{Notification, NotificationKind};
pub use state::State;
