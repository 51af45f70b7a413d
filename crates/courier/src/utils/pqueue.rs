use std::cmp::Ordering;
use std::collections::BinaryHeap;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};

use crate::request::RequestRef;

/// A priority queue feeding one kind of dispatcher.
///
/// `add` never blocks; `take` waits until a request is available or the quit
/// signal fires. Requests come out ordered by priority (highest first) and by
/// sequence number within a priority (smallest first).
pub(crate) struct DispatchQueue {
    heap: Mutex<BinaryHeap<QueueItem>>,
    ready: Semaphore,
}

struct QueueItem(RequestRef);

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then FIFO by sequence number.
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        DispatchQueue {
            heap: Mutex::new(BinaryHeap::new()),
            ready: Semaphore::new(0),
        }
    }

    pub fn add(&self, request: RequestRef) {
        self.heap.lock().push(QueueItem(request));
        self.ready.add_permits(1);
    }

    /// Takes the next request, waiting if the queue is empty. Returns `None`
    /// once `quit` fires; queued requests are then abandoned.
    pub async fn take(&self, quit: &mut watch::Receiver<bool>) -> Option<RequestRef> {
        if *quit.borrow() {
            return None;
        }
        tokio::select! {
            permit = self.ready.acquire() => {
                permit
                    .expect("dispatch queue semaphore is never closed")
                    .forget();
                let item = self
                    .heap
                    .lock()
                    .pop()
                    .expect("semaphore permit without a queued request");
                Some(item.0)
            }
            _ = quit.changed() => None,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }
}
