use std::sync::atomic::{AtomicU64, Ordering};

/// Tags recompute requests so a slow response can't overwrite a newer one.
///
/// Every request takes a ticket from [`next`](Self::next). When its response
/// lands, [`accept`](Self::accept) admits it only if no later ticket has been
/// applied already.
#[derive(Debug, Default)]
pub struct RecomputeSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl RecomputeSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn accept(&self, ticket: u64) -> bool {
        if ticket > self.issued.load(Ordering::SeqCst) {
            return false;
        }
        self.applied.fetch_max(ticket, Ordering::SeqCst) < ticket
    }

    /// Ticket of the most recently issued request
    pub fn latest(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn last_applied(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }
}
