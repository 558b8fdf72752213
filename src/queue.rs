use two_lock_queue::{self as mpmc, RecvTimeoutError, SendTimeoutError, TrySendError};

use std::fmt;
use std::time::Duration;

/// A bounded FIFO buffer of pending items.
///
/// Built on a two-lock queue: producers and consumers contend on separate
/// locks, so a busy submitter does not stall workers pulling from the other
/// end. Items leave in exactly the order they entered.
///
/// Closing the queue rejects further inserts but still hands out the items
/// already buffered; once those are gone every dequeue reports `Closed`.
pub struct TaskQueue<T> {
    tx: mpmc::Sender<T>,
    rx: mpmc::Receiver<T>,
    capacity: usize,
}

/// Result of a blocking dequeue
#[derive(Debug)]
pub enum Dequeue<T> {
    /// The oldest buffered item
    Item(T),
    /// Nothing arrived before the timeout elapsed
    Timeout,
    /// The queue is closed and drained
    Closed,
}

/// Error returned when a blocking enqueue gives up; the item is handed back.
#[derive(Debug, Eq, PartialEq)]
pub enum EnqueueError<T> {
    /// The queue stayed full for the whole timeout
    Timeout(T),
    /// The queue was closed
    Closed(T),
}

impl<T> EnqueueError<T> {
    /// Recover the item that could not be enqueued
    pub fn into_inner(self) -> T {
        match self {
            EnqueueError::Timeout(item) | EnqueueError::Closed(item) => item,
        }
    }
}

impl<T> TaskQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// A zero capacity queue never buffers anything: every enqueue fails and
    /// items only pass through `handoff`.
    pub fn new(capacity: usize) -> TaskQueue<T> {
        // Zero capacity is enforced here. The underlying channel is left
        // unbounded so `handoff` can pass any number of items through.
        let (tx, rx) = mpmc::channel(if capacity == 0 { usize::MAX } else { capacity });

        TaskQueue { tx, rx, capacity }
    }

    /// Maximum number of items the queue holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `item` if there is room, otherwise hand it back immediately.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        if self.capacity == 0 {
            return Err(item);
        }

        self.tx.try_send(item).map_err(|err| match err {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    /// Insert `item` regardless of capacity, failing only if the queue is
    /// closed.
    ///
    /// Meant for a zero capacity queue whose caller knows a consumer is
    /// already waiting to take the item.
    pub fn handoff(&self, item: T) -> Result<(), T> {
        if !self.is_open() {
            return Err(item);
        }

        self.tx.try_send(item).map_err(|err| match err {
            TrySendError::Full(item) | TrySendError::Disconnected(item) => item,
        })
    }

    /// Insert `item`, waiting up to `timeout` for room.
    pub fn enqueue_blocking(&self, item: T, timeout: Duration) -> Result<(), EnqueueError<T>> {
        if !self.is_open() {
            return Err(EnqueueError::Closed(item));
        }

        if self.capacity == 0 {
            return Err(EnqueueError::Timeout(item));
        }

        self.tx.send_timeout(item, timeout).map_err(|err| match err {
            SendTimeoutError::Timeout(item) => EnqueueError::Timeout(item),
            SendTimeoutError::Disconnected(item) => EnqueueError::Closed(item),
        })
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Dequeue<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Dequeue::Item(item),
            Err(RecvTimeoutError::Timeout) => Dequeue::Timeout,
            Err(RecvTimeoutError::Disconnected) => Dequeue::Closed,
        }
    }

    /// Remove the oldest item, waiting as long as it takes. Returns `None`
    /// once the queue is closed and drained.
    pub fn dequeue_blocking_indefinite(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Remove the oldest item without waiting
    pub fn try_dequeue(&self) -> Option<T> {
        match self.dequeue_blocking(Duration::from_millis(0)) {
            Dequeue::Item(item) => Some(item),
            Dequeue::Timeout | Dequeue::Closed => None,
        }
    }

    /// Remove and return every buffered item, oldest first
    pub fn drain(&self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.size());

        while let Some(item) = self.try_dequeue() {
            drained.push(item);
        }

        drained
    }

    /// Stop accepting items. Buffered items can still be dequeued.
    pub fn close(&self) {
        self.rx.close();
    }

    /// Returns `true` until `close` is called
    pub fn is_open(&self) -> bool {
        self.rx.is_open()
    }

    /// Number of buffered items
    pub fn size(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

impl<T> fmt::Debug for TaskQueue<T> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("TaskQueue")
           .field("capacity", &self.capacity)
           .field("size", &self.size())
           .field("open", &self.is_open())
           .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let queue = TaskQueue::new(8);

        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }

        assert_eq!(5, queue.size());
        assert_eq!(vec![0, 1, 2, 3, 4], queue.drain());
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_fails_at_capacity() {
        let queue = TaskQueue::new(2);

        queue.enqueue("a").unwrap();
        queue.enqueue("b").unwrap();
        assert_eq!(Err("c"), queue.enqueue("c"));
        assert_eq!(2, queue.size());
    }

    #[test]
    fn zero_capacity_never_holds_items() {
        let queue = TaskQueue::new(0);

        assert_eq!(Err(1), queue.enqueue(1));
        assert_eq!(
            Err(EnqueueError::Timeout(2)),
            queue.enqueue_blocking(2, Duration::from_millis(10)));
        assert!(queue.is_empty());
    }

    #[test]
    fn handoff_bypasses_zero_capacity() {
        let queue = TaskQueue::new(0);

        assert_eq!(Ok(()), queue.handoff(1));
        assert_eq!(Ok(()), queue.handoff(2));
        assert_eq!(Err(3), queue.enqueue(3));
        assert_eq!(2, queue.size());
        assert_eq!(Some(1), queue.try_dequeue());

        queue.close();
        assert_eq!(Err(4), queue.handoff(4));
        assert_eq!(vec![2], queue.drain());
    }

    #[test]
    fn enqueue_blocking_times_out_when_full() {
        let queue = TaskQueue::new(1);
        queue.enqueue(1).unwrap();

        let start = Instant::now();
        let res = queue.enqueue_blocking(2, Duration::from_millis(50));

        assert_eq!(Err(EnqueueError::Timeout(2)), res);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn enqueue_blocking_waits_for_room() {
        let queue = Arc::new(TaskQueue::new(1));
        queue.enqueue(1).unwrap();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                queue.dequeue_blocking_indefinite()
            })
        };

        queue.enqueue_blocking(2, Duration::from_secs(5)).unwrap();
        assert_eq!(Some(1), consumer.join().unwrap());
        assert_eq!(Some(2), queue.try_dequeue());
    }

    #[test]
    fn dequeue_blocking_times_out() {
        let queue = TaskQueue::<u32>::new(1);

        match queue.dequeue_blocking(Duration::from_millis(20)) {
            Dequeue::Timeout => {}
            res => panic!("unexpected: {:?}", res),
        }
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let queue = TaskQueue::new(4);
        queue.enqueue(1).unwrap();
        queue.close();

        assert!(!queue.is_open());
        assert_eq!(Err(2), queue.enqueue(2));
        assert_eq!(
            Err(EnqueueError::Closed(3)),
            queue.enqueue_blocking(3, Duration::from_millis(10)));

        assert_eq!(Some(1), queue.dequeue_blocking_indefinite());
        assert_eq!(None, queue.dequeue_blocking_indefinite());

        match queue.dequeue_blocking(Duration::from_millis(10)) {
            Dequeue::Closed => {}
            res => panic!("unexpected: {:?}", res),
        }
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(TaskQueue::<u32>::new(1));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue_blocking_indefinite())
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(None, consumer.join().unwrap());
    }
}
