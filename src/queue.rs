//! Bounded FIFO buffer holding records that await redelivery.
//!
//! The queue tracks the cumulative size of its contents using a pluggable
//! size calculation and evicts the oldest entries whenever an insertion
//! would push the total past the configured maximum. Survivors keep their
//! FIFO order, so a drained queue always yields the most recent records
//! oldest-first.

use std::collections::VecDeque;
use std::fmt;

use log::warn;
use thiserror::Error;

/// Computes the size of a stored item in the unit the queue is bounded by.
pub type SizeCalculation<T> = Box<dyn Fn(&T) -> usize + Send>;

/// Errors raised when an item cannot be stored.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The item on its own is larger than the whole queue.
    #[error("item size {size} exceeds queue maximum {max_size}")]
    ItemTooLarge { size: usize, max_size: usize },
}

/// A size-bounded FIFO queue.
///
/// Enqueueing never fails because the queue is full; instead the oldest
/// entries are evicted until the new item fits. Only an item whose own size
/// exceeds `max_size` is rejected, leaving the queue untouched.
pub struct BoundedQueue<T> {
    items: VecDeque<(T, usize)>,
    total_size: usize,
    max_size: usize,
    size_of: SizeCalculation<T>,
}

impl<T> BoundedQueue<T> {
    /// Create a queue bounded at `max_size` with a custom size calculation.
    pub fn new(max_size: usize, size_of: SizeCalculation<T>) -> Self {
        Self {
            items: VecDeque::new(),
            total_size: 0,
            max_size,
            size_of,
        }
    }

    /// Append an item at the tail, evicting from the head until it fits.
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueError> {
        let size = (self.size_of)(&item);
        if size > self.max_size {
            warn!(
                "sockrelay: rejecting queued item of size {size}; queue maximum is {}",
                self.max_size
            );
            return Err(QueueError::ItemTooLarge {
                size,
                max_size: self.max_size,
            });
        }
        while self.total_size + size > self.max_size {
            self.evict();
        }
        self.total_size += size;
        self.items.push_back((item, size));
        Ok(())
    }

    /// Remove and return the oldest item, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<T> {
        let (item, size) = self.items.pop_front()?;
        self.total_size -= size;
        Some(item)
    }

    /// Borrow the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front().map(|(item, _)| item)
    }

    /// Discard the oldest item. No-op when empty.
    pub fn evict(&mut self) {
        if let Some((_, size)) = self.items.pop_front() {
            self.total_size -= size;
        }
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cumulative size of all live items.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Configured maximum cumulative size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl BoundedQueue<Vec<u8>> {
    /// Create a byte-record queue sized by payload length.
    pub fn bytes(max_size: usize) -> Self {
        Self::new(max_size, Box::new(|record: &Vec<u8>| record.len()))
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("len", &self.items.len())
            .field("total_size", &self.total_size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn dequeues_in_fifo_order() {
        let mut queue = BoundedQueue::bytes(usize::MAX);
        queue.enqueue(b"a".to_vec()).unwrap();
        queue.enqueue(b"b".to_vec()).unwrap();
        queue.enqueue(b"c".to_vec()).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue(), Some(b"a".to_vec()));
        assert_eq!(queue.dequeue(), Some(b"b".to_vec()));
        assert_eq!(queue.dequeue(), Some(b"c".to_vec()));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
        assert_eq!(queue.total_size(), 0);
    }

    #[test]
    fn peek_leaves_the_head_in_place() {
        let mut queue = BoundedQueue::bytes(16);
        queue.enqueue(b"head".to_vec()).unwrap();
        assert_eq!(queue.peek(), Some(&b"head".to_vec()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn evicts_oldest_until_new_item_fits() {
        let mut queue = BoundedQueue::bytes(10);
        for (len, fill) in [(1, b'a'), (2, b'b'), (2, b'c'), (1, b'd'), (1, b'e'), (3, b'f')] {
            queue.enqueue(record(len, fill)).unwrap();
        }
        assert_eq!(queue.total_size(), 10);

        // Total would reach 11, so the single oldest byte is evicted.
        queue.enqueue(record(1, b'g')).unwrap();
        assert_eq!(queue.total_size(), 10);
        let drained: Vec<Vec<u8>> = std::iter::from_fn(|| queue.dequeue()).collect();
        let expected = vec![
            record(2, b'b'),
            record(2, b'c'),
            record(1, b'd'),
            record(1, b'e'),
            record(3, b'f'),
            record(1, b'g'),
        ];
        assert_eq!(drained, expected);
    }

    #[test]
    fn exact_fit_into_empty_queue_needs_no_eviction() {
        let mut queue = BoundedQueue::bytes(8);
        queue.enqueue(record(8, b'x')).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.total_size(), 8);
    }

    #[test]
    fn oversized_item_is_rejected_without_mutation() {
        let mut queue = BoundedQueue::bytes(4);
        queue.enqueue(record(3, b'a')).unwrap();
        let err = queue.enqueue(record(5, b'b')).unwrap_err();
        assert_eq!(
            err,
            QueueError::ItemTooLarge {
                size: 5,
                max_size: 4
            }
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.total_size(), 3);
        assert_eq!(queue.peek(), Some(&record(3, b'a')));
    }

    #[test]
    fn eviction_on_empty_queue_is_a_no_op() {
        let mut queue = BoundedQueue::bytes(4);
        queue.evict();
        assert!(queue.is_empty());
    }

    #[test]
    fn custom_size_calculation_drives_eviction() {
        // Count every item as one unit regardless of payload length.
        let mut queue: BoundedQueue<Vec<u8>> = BoundedQueue::new(2, Box::new(|_| 1));
        queue.enqueue(b"one".to_vec()).unwrap();
        queue.enqueue(b"two".to_vec()).unwrap();
        queue.enqueue(b"three".to_vec()).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(b"two".to_vec()));
        assert_eq!(queue.dequeue(), Some(b"three".to_vec()));
    }

    #[test]
    fn running_total_never_exceeds_max() {
        let mut queue = BoundedQueue::bytes(10);
        for len in [1usize, 4, 9, 2, 7, 10, 3, 5] {
            queue.enqueue(record(len, b'z')).unwrap();
            assert!(queue.total_size() <= queue.max_size());
        }
    }
}
