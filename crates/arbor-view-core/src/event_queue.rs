//! Shared queue for change events posted from outside the owning context.
//!
//! The visual forest is mutated only from the single context that owns it.
//! Background work (long-running searches, imports) never touches the forest
//! directly; it posts change events into this queue instead. A drain step,
//! invoked on the forest-owning context at safe points, dequeues events
//! strictly in submission order and hands them to the change-event processor.
//!
//! The queue is the only shared, lock-protected resource in the engine.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::QueueError;

/// A mutex-guarded FIFO of pending change events.
///
/// `post` may be called from any thread; `drain` is intended to be called
/// from the owning context only. Events come back out in exactly the order
/// they were posted.
pub struct EventQueue<T> {
    inner: Mutex<QueueState<T>>,
}

struct QueueState<T> {
    events: VecDeque<T>,
    closed: bool,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                events: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Post an event onto the queue.
    ///
    /// Returns [`QueueError::Closed`] if the queue has been closed.
    pub fn post(&self, event: T) -> Result<(), QueueError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(QueueError::Closed);
        }
        state.events.push_back(event);
        Ok(())
    }

    /// Take every pending event, in submission order.
    ///
    /// The snapshot is taken under the lock, but the returned events are
    /// processed without holding it, so posters are never blocked on event
    /// application.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.inner.lock();
        state.events.drain(..).collect()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// Returns `true` if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }

    /// Close the queue.
    ///
    /// Pending events remain drainable; further `post` calls fail.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Returns `true` if the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_post_and_drain_in_order() {
        let queue = EventQueue::new();
        queue.post(1).unwrap();
        queue.post(2).unwrap();
        queue.post(3).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.drain(), vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_empty() {
        let queue: EventQueue<i32> = EventQueue::new();
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_closed_queue_rejects_posts() {
        let queue = EventQueue::new();
        queue.post("before").unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert_eq!(queue.post("after"), Err(QueueError::Closed));
        // Pending events survive the close.
        assert_eq!(queue.drain(), vec!["before"]);
    }

    #[test]
    fn test_cross_thread_posting() {
        let queue = Arc::new(EventQueue::new());

        let handles: Vec<_> = (0..4)
            .map(|thread| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        queue.post((thread, i)).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let events = queue.drain();
        assert_eq!(events.len(), 100);

        // Per-thread submission order is preserved even under interleaving.
        for thread in 0..4 {
            let seen: Vec<_> = events.iter().filter(|(t, _)| *t == thread).collect();
            for (pos, (_, i)) in seen.iter().enumerate() {
                assert_eq!(*i, pos);
            }
        }
    }
}
