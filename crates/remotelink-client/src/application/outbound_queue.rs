//! Bounded FIFO of envelopes waiting for a link.
//!
//! Envelopes sent while the client is not connected wait here and are flushed
//! in order after the next successful (re)connect.  Entries older than the
//! configured expiry are dropped at flush time rather than delivered late.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use remotelink_core::Envelope;

/// An envelope and the moment it was queued.
#[derive(Debug, Clone)]
pub struct QueuedEnvelope {
    pub envelope: Envelope,
    pub queued_at: Instant,
}

/// Result of [`OutboundQueue::drain_live`].
#[derive(Debug, Default)]
pub struct Drained {
    /// Still-fresh envelopes, oldest first.
    pub live: Vec<QueuedEnvelope>,
    /// How many entries were discarded as expired.
    pub expired: usize,
}

#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedEnvelope>,
    capacity: usize,
    expiry: Option<Duration>,
}

impl OutboundQueue {
    /// A capacity of zero disables queueing.
    pub fn new(capacity: usize, expiry: Option<Duration>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            expiry,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `envelope`.  Hands it back if the queue is full or disabled.
    pub fn push(&mut self, envelope: Envelope, now: Instant) -> Result<(), Envelope> {
        if self.entries.len() >= self.capacity {
            return Err(envelope);
        }
        self.entries.push_back(QueuedEnvelope {
            envelope,
            queued_at: now,
        });
        Ok(())
    }

    /// Empties the queue, splitting entries into live and expired.
    pub fn drain_live(&mut self, now: Instant) -> Drained {
        let mut drained = Drained::default();
        for entry in self.entries.drain(..) {
            let expired = self
                .expiry
                .is_some_and(|ttl| now.saturating_duration_since(entry.queued_at) > ttl);
            if expired {
                drained.expired += 1;
            } else {
                drained.live.push(entry);
            }
        }
        drained
    }

    /// Puts unsent entries back at the front, preserving their order.
    ///
    /// Restored entries may exceed the capacity; they were admitted once
    /// already.
    pub fn restore_front(&mut self, unsent: Vec<QueuedEnvelope>) {
        for entry in unsent.into_iter().rev() {
            self.entries.push_front(entry);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
