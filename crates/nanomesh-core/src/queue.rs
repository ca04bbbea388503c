//! Upload queues
//!
//! Producer/consumer hand-off between loader workers and the frame loop.
//! Producers only append; the consumer swaps the whole buffer out under the
//! lock and processes it after releasing it.

use parking_lot::Mutex;

/// Mutex-guarded multi-producer, single-consumer queue
#[derive(Debug)]
pub struct UploadQueue<T> {
    items: Mutex<Vec<T>>,
}

impl<T> UploadQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Append a finished item
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Take every queued item, leaving the queue empty
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for UploadQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_takes_everything() {
        let queue = UploadQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec![1, 2]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_many_producers() {
        let queue = Arc::new(UploadQueue::new());
        let producers: Vec<_> = (0..8)
            .map(|id| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        queue.push(id * 100 + i);
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        for producer in producers {
            producer.join().unwrap();
        }
        received.extend(queue.drain());

        assert_eq!(received.len(), 400);
    }
}
