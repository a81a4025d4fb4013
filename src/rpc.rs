//! # RPC Correlator
//!
//! Bounded bookkeeping for inbound RPC invocations awaiting a reply. Each
//! entry pairs the request id with a logical arrival stamp; when the table is
//! full the oldest entry is evicted so a burst of abandoned requests can
//! never wedge the gateway.
//!
//! The correlator performs no time-based expiry: an application that never
//! answers a request simply leaks one slot until eviction.

use heapless::Vec;

/// Default capacity of the in-flight table.
pub const MAX_INFLIGHT_RPCS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Inflight {
    id: u32,
    seq: u64,
}

/// Tracks which inbound RPC ids are awaiting a response.
#[derive(Debug, Default)]
pub struct RpcCorrelator<const N: usize> {
    inflight: Vec<Inflight, N>,
    clock: u64,
}

impl<const N: usize> RpcCorrelator<N> {
    /// Creates an empty correlator.
    pub fn new() -> Self {
        Self {
            inflight: Vec::new(),
            clock: 0,
        }
    }

    /// Registers an inbound request id.
    ///
    /// A re-delivered id refreshes its arrival stamp instead of occupying a
    /// second slot. When the table is full, the oldest entry is evicted.
    pub fn begin_inbound(&mut self, id: u32) {
        self.clock += 1;
        let seq = self.clock;
        if let Some(entry) = self.inflight.iter_mut().find(|e| e.id == id) {
            entry.seq = seq;
            return;
        }
        if self.inflight.is_full() {
            if let Some(oldest) = (0..self.inflight.len()).min_by_key(|&i| self.inflight[i].seq) {
                warn!("rpc table full, evicting id {}", self.inflight[oldest].id);
                self.inflight.swap_remove(oldest);
            }
        }
        let _ = self.inflight.push(Inflight { id, seq });
    }

    /// Removes a pending id; `false` if it was not pending.
    pub fn complete(&mut self, id: u32) -> bool {
        match self.inflight.iter().position(|e| e.id == id) {
            Some(i) => {
                self.inflight.swap_remove(i);
                true
            }
            None => false,
        }
    }

    /// Whether the id is awaiting a response.
    pub fn is_pending(&self, id: u32) -> bool {
        self.inflight.iter().any(|e| e.id == id)
    }

    /// Number of requests awaiting a response.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    /// Whether no request is awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Drops every pending entry.
    pub fn clear(&mut self) {
        self.inflight.clear();
    }
}
