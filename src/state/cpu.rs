use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::state::process::Tid;

pub type CpuId = u32;

/// A hard interrupt handler invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HardIrq {
    pub id: i64,
    pub cpu_id: CpuId,
    pub begin_ts: i64,
    pub end_ts: Option<i64>,
    pub ret: Option<i64>,
}

impl HardIrq {
    pub fn new(id: i64, cpu_id: CpuId, begin_ts: i64) -> Self {
        Self {
            id,
            cpu_id,
            begin_ts,
            end_ts: None,
            ret: None,
        }
    }

    pub fn duration(&self) -> Option<i64> {
        self.end_ts.map(|end| end - self.begin_ts)
    }
}

/// A soft interrupt occurrence, from raise (if traced) to exit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SoftIrq {
    /// Softirq vector.
    pub id: i64,
    pub cpu_id: CpuId,
    pub raise_ts: Option<i64>,
    pub begin_ts: Option<i64>,
    pub end_ts: Option<i64>,
}

impl SoftIrq {
    pub fn raised(id: i64, cpu_id: CpuId, raise_ts: i64) -> Self {
        Self {
            id,
            cpu_id,
            raise_ts: Some(raise_ts),
            begin_ts: None,
            end_ts: None,
        }
    }

    pub fn entered(id: i64, cpu_id: CpuId, begin_ts: i64) -> Self {
        Self {
            id,
            cpu_id,
            raise_ts: None,
            begin_ts: Some(begin_ts),
            end_ts: None,
        }
    }

    pub fn duration(&self) -> Option<i64> {
        Some(self.end_ts? - self.begin_ts?)
    }

    /// Time spent between raise and handler entry.
    pub fn raise_latency(&self) -> Option<i64> {
        Some(self.begin_ts? - self.raise_ts?)
    }
}

/// Scheduling and interrupt state of one logical CPU.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Cpu {
    pub cpu_id: CpuId,
    /// `None` when idle or unknown.
    pub current_tid: Option<Tid>,
    pub current_hard_irq: Option<HardIrq>,
    /// Queued softirqs per vector, oldest first. Several can be raised
    /// before the first one is handled.
    pub current_softirqs: BTreeMap<i64, VecDeque<SoftIrq>>,
}

impl Cpu {
    pub fn new(cpu_id: CpuId) -> Self {
        Self {
            cpu_id,
            ..Default::default()
        }
    }

    pub(crate) fn enter_hard_irq(&mut self, id: i64, ts: i64) {
        self.current_hard_irq = Some(HardIrq::new(id, self.cpu_id, ts));
    }

    /// Close the current hard IRQ. The slot is cleared either way; the
    /// finished IRQ is only returned when `id` matches it.
    pub(crate) fn exit_hard_irq(&mut self, id: i64, ts: i64, ret: Option<i64>) -> Option<HardIrq> {
        match self.current_hard_irq.take() {
            Some(mut irq) if irq.id == id => {
                irq.end_ts = Some(ts);
                irq.ret = ret;
                Some(irq)
            }
            _ => None,
        }
    }

    /// Softirqs are level-triggered: raising a vector that already has an
    /// occurrence waiting for entry does nothing. Returns whether a new
    /// occurrence was queued.
    pub(crate) fn raise_softirq(&mut self, vec: i64, ts: i64) -> bool {
        let queue = self.current_softirqs.entry(vec).or_default();
        if queue.back().is_some_and(|irq| irq.begin_ts.is_none()) {
            return false;
        }
        queue.push_back(SoftIrq::raised(vec, self.cpu_id, ts));
        true
    }

    pub(crate) fn enter_softirq(&mut self, vec: i64, ts: i64) {
        let cpu_id = self.cpu_id;
        let queue = self.current_softirqs.entry(vec).or_default();
        match queue.front_mut() {
            Some(irq) => irq.begin_ts = Some(ts),
            // Raised before the trace started.
            None => queue.push_back(SoftIrq::entered(vec, cpu_id, ts)),
        }
    }

    pub(crate) fn exit_softirq(&mut self, vec: i64, ts: i64) -> Option<SoftIrq> {
        let mut irq = self.current_softirqs.get_mut(&vec)?.pop_front()?;
        irq.end_ts = Some(ts);
        Some(irq)
    }
}
