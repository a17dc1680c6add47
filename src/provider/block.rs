use crate::event::TraceEvent;
use crate::notify::Notification;
use crate::provider::{HandlerTable, StateProvider};
use crate::state::{BlockIoRequest, BlockRemapRequest, State};

/// Pairs block request issue and completion, following remaps through
/// stacked devices back to the device the request was issued to.
pub struct BlockProvider {
    handlers: HandlerTable<Self>,
    remap_requests: Vec<BlockRemapRequest>,
}

impl Default for BlockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockProvider {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(&[
                ("block_bio_remap", Self::bio_remap),
                ("block_bio_backmerge", Self::bio_backmerge),
                ("block_rq_issue", Self::rq_issue),
                ("block_rq_complete", Self::rq_complete),
            ]),
            remap_requests: Vec::new(),
        }
    }

    /// Remaps waiting for their request to complete.
    pub fn remap_requests(&self) -> &[BlockRemapRequest] {
        &self.remap_requests
    }

    fn find_remap(&self, dev: u64, sector: u64) -> Option<usize> {
        self.remap_requests
            .iter()
            .position(|remap| remap.dev == dev && remap.sector == sector)
    }

    fn bio_remap(&mut self, _state: &mut State, event: &dyn TraceEvent) {
        let (Some(dev), Some(sector), Some(old_dev), Some(old_sector)) = (
            event.get_u64("dev"),
            event.get_u64("sector"),
            event.get_u64("old_dev"),
            event.get_u64("old_sector"),
        ) else {
            return;
        };

        // Remapped again: only the original device and sector are kept.
        if let Some(idx) = self.find_remap(old_dev, old_sector) {
            let remap = &mut self.remap_requests[idx];
            remap.dev = dev;
            remap.sector = sector;
            return;
        }
        self.remap_requests.push(BlockRemapRequest {
            dev,
            sector,
            old_dev,
            old_sector,
        });
    }

    fn bio_backmerge(&mut self, _state: &mut State, event: &dyn TraceEvent) {
        let (Some(dev), Some(sector)) = (event.get_u64("dev"), event.get_u64("sector")) else {
            return;
        };
        self.remap_requests
            .retain(|remap| !(remap.dev == dev && remap.sector == sector));
    }

    fn rq_issue(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(dev), Some(sector), Some(nr_sector), Some(rwbs)) = (
            event.get_u64("dev"),
            event.get_u64("sector"),
            event.get_u64("nr_sector"),
            event.get_u64("rwbs"),
        ) else {
            return;
        };
        if nr_sector == 0 {
            return;
        }

        // The remap stays until the completion.
        let dev = match self.find_remap(dev, sector) {
            Some(idx) => self.remap_requests[idx].old_dev,
            None => dev,
        };

        let req = BlockIoRequest::new(
            event.timestamp(),
            dev,
            sector,
            nr_sector,
            BlockIoRequest::operation_from_rwbs(rwbs),
            event.get_i64("tid"),
        );
        if let Some(stale) = state.disk_mut(dev).pending_requests.insert(sector, req) {
            tracing::trace!(
                "Replacing uncompleted request on dev {} sector {} issued at {}",
                dev,
                sector,
                stale.begin_ts
            );
        }
    }

    fn rq_complete(&mut self, state: &mut State, event: &dyn TraceEvent) {
        let (Some(dev), Some(sector), Some(nr_sector)) = (
            event.get_u64("dev"),
            event.get_u64("sector"),
            event.get_u64("nr_sector"),
        ) else {
            return;
        };
        if nr_sector == 0 {
            return;
        }

        let dev = match self.find_remap(dev, sector) {
            Some(idx) => self.remap_requests.remove(idx).old_dev,
            None => dev,
        };

        let Some(disk) = state.disks.get_mut(&dev) else {
            tracing::trace!("Completion on unknown dev {} sector {}", dev, sector);
            return;
        };
        if !disk
            .pending_requests
            .get(&sector)
            .is_some_and(|req| req.nr_sector == nr_sector)
        {
            tracing::trace!("Unmatched completion on dev {} sector {}", dev, sector);
            return;
        }
        let Some(mut req) = disk.pending_requests.remove(&sector) else {
            return;
        };
        req.complete(event.timestamp());

        let proc = req.tid.and_then(|tid| state.tids.get(&tid));
        state
            .notifications
            .publish(&Notification::BlockRqComplete { req: &req, proc });
    }
}

impl StateProvider for BlockProvider {
    fn name(&self) -> &'static str {
        "block"
    }

    fn process_event(&mut self, state: &mut State, event: &dyn TraceEvent) {
        if let Some(handler) = self.handlers.lookup(event.name()) {
            handler(self, state, event);
        }
    }
}
