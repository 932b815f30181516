//! Bounded typed call channel
//!
//! One channel exists per (receiving node, call type). Any thread may enqueue;
//! only the owning node's thread drains.
//!
//! # Real-Time Safety
//!
//! - **No allocation on drain**: the queue is a fixed `ArrayQueue` sized at
//!   registration, and reply slots are allocated by the caller
//! - **Never blocks**: a full queue rejects and hands the request back
//! - **No frees on drain**: a response whose caller has gone away is parked
//!   in a preallocated side queue and dropped later by a cooperative caller
//! - **Bounded drain**: at most `capacity` entries are handled per tick, so a
//!   producer racing the drain cannot stretch the tick

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;
use tokio::sync::oneshot;

use super::call::Call;

/// A queued request plus the slot its response goes to
pub(crate) struct Envelope<C: Call> {
    pub request: C::Request,
    pub reply: Option<oneshot::Sender<C::Response>>,
}

/// Bounded FIFO of pending requests for one call type
pub struct CallChannel<C: Call> {
    queue: ArrayQueue<Envelope<C>>,
    /// Responses nobody was waiting for, freed off the draining thread
    orphans: ArrayQueue<C::Response>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    /// Set once the receiving node is gone
    closed: AtomicBool,
}

impl<C: Call> CallChannel<C> {
    /// Create a channel with a fixed capacity (must be non-zero)
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            orphans: ArrayQueue::new(capacity),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an envelope, handing it back if the channel is full or closed
    pub(crate) fn enqueue(&self, envelope: Envelope<C>) -> Result<(), Envelope<C>> {
        if self.is_closed() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(envelope);
        }
        match self.queue.push(envelope) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(envelope) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(envelope)
            }
        }
    }

    /// Handle pending requests in FIFO order
    ///
    /// Returns the number of requests handled. Responses whose caller has
    /// gone away are parked until [`reap`](Self::reap); only when the parking
    /// queue is also full are they dropped here.
    pub(crate) fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(C::Request) -> C::Response,
    {
        let mut handled = 0;
        while handled < self.queue.capacity() {
            let Some(envelope) = self.queue.pop() else {
                break;
            };
            let response = handler(envelope.request);
            if let Some(reply) = envelope.reply {
                if let Err(response) = reply.send(response) {
                    let _ = self.orphans.push(response);
                }
            }
            handled += 1;
        }
        handled
    }

    /// Stop accepting work and drop everything queued
    ///
    /// Dropping a queued envelope drops its reply sender, which wakes the
    /// blocking caller with a disconnect.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.clear();
    }

    /// Drop everything queued without handling it
    pub(crate) fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    /// Free parked responses on the calling thread, returning how many
    pub(crate) fn reap(&self) -> usize {
        let mut freed = 0;
        while self.orphans.pop().is_some() {
            freed += 1;
        }
        freed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of requests waiting for the next drain
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Total requests accepted since creation
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Total requests rejected because the channel was full or closed
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    crate::define_call! {
        Echo: u32 => u32;
        Tagged: (usize, usize) => ();
    }

    fn fire(channel: &CallChannel<Echo>, value: u32) -> bool {
        channel
            .enqueue(Envelope { request: value, reply: None })
            .is_ok()
    }

    #[test]
    fn test_enqueue_beyond_capacity_rejects() {
        let channel = CallChannel::<Echo>::new(2);
        assert!(fire(&channel, 1));
        assert!(fire(&channel, 2));
        assert!(!fire(&channel, 3));

        assert_eq!(channel.pending(), 2);
        assert_eq!(channel.accepted(), 2);
        assert_eq!(channel.rejected(), 1);
    }

    #[test]
    fn test_rejected_envelope_is_handed_back() {
        let channel = CallChannel::<Echo>::new(1);
        assert!(fire(&channel, 1));
        let err = channel
            .enqueue(Envelope { request: 42, reply: None })
            .err()
            .unwrap();
        assert_eq!(err.request, 42);
    }

    #[test]
    fn test_drain_is_fifo_and_replies() {
        let channel = CallChannel::<Echo>::new(4);
        let (tx, mut rx) = oneshot::channel();
        fire(&channel, 1);
        channel
            .enqueue(Envelope { request: 2, reply: Some(tx) })
            .ok()
            .unwrap();
        fire(&channel, 3);

        let mut seen = Vec::new();
        let handled = channel.drain(|v| {
            seen.push(v);
            v * 10
        });

        assert_eq!(handled, 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(rx.try_recv().unwrap(), 20);
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_drain_is_bounded_by_capacity() {
        let channel = Arc::new(CallChannel::<Echo>::new(2));
        fire(&channel, 1);
        fire(&channel, 2);

        // Refill from inside the handler to simulate a producer racing the drain
        let producer = channel.clone();
        let handled = channel.drain(|v| {
            let _ = fire(&producer, v + 100);
            v
        });

        assert_eq!(handled, 2);
        assert_eq!(channel.pending(), 2);
    }

    #[test]
    fn test_dropped_caller_does_not_break_drain() {
        let channel = CallChannel::<Echo>::new(2);
        let (tx, rx) = oneshot::channel();
        drop(rx);
        channel
            .enqueue(Envelope { request: 7, reply: Some(tx) })
            .ok()
            .unwrap();
        assert_eq!(channel.drain(|v| v), 1);
    }

    /// Response that records when it is freed
    struct Tracked(Arc<AtomicBool>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_unclaimed_response_is_freed_by_reap() {
        crate::define_call! {
            Fetch: () => Tracked;
        }

        let channel = CallChannel::<Fetch>::new(2);
        let (tx, rx) = oneshot::channel();
        drop(rx);
        channel
            .enqueue(Envelope { request: (), reply: Some(tx) })
            .ok()
            .unwrap();

        let freed = Arc::new(AtomicBool::new(false));
        let response = freed.clone();
        assert_eq!(channel.drain(|()| Tracked(response.clone())), 1);
        assert!(!freed.load(Ordering::SeqCst));

        assert_eq!(channel.reap(), 1);
        assert!(freed.load(Ordering::SeqCst));
        assert_eq!(channel.reap(), 0);
    }

    #[test]
    fn test_closed_channel_rejects_and_hands_back() {
        let channel = CallChannel::<Echo>::new(2);
        channel.close();

        let err = channel
            .enqueue(Envelope { request: 9, reply: None })
            .err()
            .unwrap();
        assert_eq!(err.request, 9);
        assert_eq!(channel.accepted(), 0);
        assert_eq!(channel.rejected(), 1);
        assert_eq!(channel.pending(), 0);
    }

    #[test]
    fn test_close_wakes_waiting_callers() {
        let channel = CallChannel::<Echo>::new(2);
        let (tx, mut rx) = oneshot::channel();
        channel
            .enqueue(Envelope { request: 1, reply: Some(tx) })
            .ok()
            .unwrap();

        channel.close();

        assert!(channel.is_closed());
        assert_eq!(channel.pending(), 0);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_multi_producer_order_per_producer() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 500;

        let channel = Arc::new(CallChannel::<Tagged>::new(PRODUCERS * PER_PRODUCER));
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let channel = channel.clone();
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        channel
                            .enqueue(Envelope { request: (p, seq), reply: None })
                            .ok()
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut last = [None::<usize>; PRODUCERS];
        let mut total = 0;
        channel.drain(|(p, seq)| {
            // Each producer's entries appear exactly once and in order
            if let Some(prev) = last[p] {
                assert_eq!(seq, prev + 1);
            } else {
                assert_eq!(seq, 0);
            }
            last[p] = Some(seq);
            total += 1;
        });

        assert_eq!(total, PRODUCERS * PER_PRODUCER);
        assert!(last.iter().all(|l| *l == Some(PER_PRODUCER - 1)));
    }
}
