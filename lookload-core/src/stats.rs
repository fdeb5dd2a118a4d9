//! Load statistics for one root query.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Association requests received.
    pub requests: u64,
    /// Requests answered by a handle already pending for the same identity.
    pub coalesced: u64,
    /// Requests answered from an earlier tick's results.
    pub cache_hits: u64,
    /// Batches flushed.
    pub batches: u64,
    /// Storage calls issued for association batches.
    pub chunks: u64,
    /// Identities served from the ledger without a storage call.
    pub ledger_hits: u64,
    /// Batches skipped entirely because the ledger covered them.
    pub ledger_skips: u64,
    /// Connection batches flushed.
    pub connection_batches: u64,
    /// Batches that failed.
    pub failures: u64,
}

impl LoadStats {
    /// Fraction of requests that did not reach storage (0.0 to 1.0).
    pub fn reuse_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.coalesced + self.cache_hits) as f64 / self.requests as f64
        }
    }
}

/// Atomic counters behind [`LoadStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    requests: AtomicU64,
    coalesced: AtomicU64,
    cache_hits: AtomicU64,
    batches: AtomicU64,
    chunks: AtomicU64,
    ledger_hits: AtomicU64,
    ledger_skips: AtomicU64,
    connection_batches: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Requests,
    Coalesced,
    CacheHits,
    Batches,
    Chunks,
    LedgerHits,
    LedgerSkips,
    ConnectionBatches,
    Failures,
}

impl StatsCollector {
    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Requests => &self.requests,
            Counter::Coalesced => &self.coalesced,
            Counter::CacheHits => &self.cache_hits,
            Counter::Batches => &self.batches,
            Counter::Chunks => &self.chunks,
            Counter::LedgerHits => &self.ledger_hits,
            Counter::LedgerSkips => &self.ledger_skips,
            Counter::ConnectionBatches => &self.connection_batches,
            Counter::Failures => &self.failures,
        }
    }

    pub(crate) fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub(crate) fn add(&self, counter: Counter, n: u64) {
        self.counter(counter).fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LoadStats {
        let get = |c| self.counter(c).load(Ordering::Relaxed);
        LoadStats {
            requests: get(Counter::Requests),
            coalesced: get(Counter::Coalesced),
            cache_hits: get(Counter::CacheHits),
            batches: get(Counter::Batches),
            chunks: get(Counter::Chunks),
            ledger_hits: get(Counter::LedgerHits),
            ledger_skips: get(Counter::LedgerSkips),
            connection_batches: get(Counter::ConnectionBatches),
            failures: get(Counter::Failures),
        }
    }
}
