// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bulk data transport — the abstract RX/TX bulk endpoint contract the
//! streamer depends on (spec.md §6's "abstracted" transport endpoints).
//!
//! No concrete USB/PCIe implementation ships here (Non-goal); a host
//! application plugs one in. [`InMemoryBulkTransport`] is the in-process
//! test double used by this crate's own tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};

/// Upper bound on outstanding completions the in-memory transport will hold
/// before a test must drain them; matches `BULK_TRANSFER_CONTEXT_POOL_SIZE`'s
/// order of magnitude since a real transport never queues deeper than its
/// context pool.
const COMPLETION_QUEUE_CAPACITY: usize = 256;

/// Opaque handle to an in-flight transfer context.
pub type ContextId = usize;

/// One completed transfer, as returned by [`BulkTransport::wait_any`].
#[derive(Debug, Clone)]
pub enum Completion {
    Rx { context_id: ContextId, data: Vec<u8> },
    Tx { context_id: ContextId },
}

/// RX/TX bulk endpoints, abstracted away from any concrete bus.
///
/// Implementations pin a pool of transfer contexts and resubmit them as they
/// complete; the streamer's worker threads only see [`ContextId`]s and
/// [`Completion`]s.
pub trait BulkTransport: Send + Sync {
    /// Submits a free context to receive up to `max_len` bytes. Returns the
    /// context id that will appear in a later [`Completion::Rx`].
    fn submit_rx(&self, max_len: usize) -> ContextId;

    /// Submits `data` for transmission. Returns the context id that will
    /// appear in a later [`Completion::Tx`].
    fn submit_tx(&self, data: Vec<u8>) -> ContextId;

    /// Blocks up to `timeout` for any outstanding transfer to complete.
    fn wait_any(&self, timeout: Duration) -> Option<Completion>;

    /// Cancels every outstanding transfer (worker shutdown).
    fn cancel_all(&self);
}

/// In-memory [`BulkTransport`] test double. Tests feed RX payloads in with
/// [`InMemoryBulkTransport::push_rx_payload`]; each call to `submit_rx`
/// immediately completes if a queued payload is available, otherwise the
/// context is simply dropped — the worker will resubmit on its next
/// iteration, which is indistinguishable from a real transport that hasn't
/// received anything yet.
#[cfg(any(test, feature = "test-support"))]
pub struct InMemoryBulkTransport {
    pending_rx: Mutex<VecDeque<Vec<u8>>>,
    completions: ArrayQueue<Completion>,
    wake: Mutex<()>,
    cv: Condvar,
    tx_log: Mutex<Vec<Vec<u8>>>,
    next_id: AtomicUsize,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for InMemoryBulkTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl InMemoryBulkTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending_rx: Mutex::new(VecDeque::new()),
            completions: ArrayQueue::new(COMPLETION_QUEUE_CAPACITY),
            wake: Mutex::new(()),
            cv: Condvar::new(),
            tx_log: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Queues raw wire bytes (one or more concatenated `FpgaDataPacket`s) to
    /// be handed back on the next `submit_rx`.
    pub fn push_rx_payload(&self, bytes: Vec<u8>) {
        self.pending_rx.lock().push_back(bytes);
    }

    /// Every byte buffer handed to `submit_tx` so far, in submission order.
    #[must_use]
    pub fn tx_log(&self) -> Vec<Vec<u8>> {
        self.tx_log.lock().clone()
    }

    fn push_completion(&self, completion: Completion) {
        if self.completions.push(completion).is_err() {
            log::warn!("in-memory bulk transport completion queue full, dropping completion");
        }
        let _guard = self.wake.lock();
        self.cv.notify_all();
    }
}

#[cfg(any(test, feature = "test-support"))]
impl BulkTransport for InMemoryBulkTransport {
    fn submit_rx(&self, _max_len: usize) -> ContextId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some(data) = self.pending_rx.lock().pop_front() {
            self.push_completion(Completion::Rx { context_id: id, data });
        }
        id
    }

    fn submit_tx(&self, data: Vec<u8>) -> ContextId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tx_log.lock().push(data);
        self.push_completion(Completion::Tx { context_id: id });
        id
    }

    fn wait_any(&self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(completion) = self.completions.pop() {
                return Some(completion);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let mut guard = self.wake.lock();
            if self.completions.is_empty() {
                self.cv.wait_for(&mut guard, deadline - now);
            }
        }
    }

    fn cancel_all(&self) {
        while self.completions.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_rx_completes_immediately_when_payload_queued() {
        let transport = InMemoryBulkTransport::new();
        transport.push_rx_payload(vec![1, 2, 3]);
        transport.submit_rx(64);
        let completion = transport.wait_any(Duration::from_millis(10)).unwrap();
        assert!(matches!(completion, Completion::Rx { data, .. } if data == vec![1, 2, 3]));
    }

    #[test]
    fn submit_rx_with_nothing_queued_times_out() {
        let transport = InMemoryBulkTransport::new();
        transport.submit_rx(64);
        assert!(transport.wait_any(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn submit_tx_logs_bytes_and_completes() {
        let transport = InMemoryBulkTransport::new();
        transport.submit_tx(vec![9, 9]);
        let completion = transport.wait_any(Duration::from_millis(10)).unwrap();
        assert!(matches!(completion, Completion::Tx { .. }));
        assert_eq!(transport.tx_log(), vec![vec![9, 9]]);
    }

    #[test]
    fn cancel_all_drops_pending_completions() {
        let transport = InMemoryBulkTransport::new();
        transport.submit_tx(vec![1]);
        transport.cancel_all();
        assert!(transport.wait_any(Duration::from_millis(5)).is_none());
    }
}
