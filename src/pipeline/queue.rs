//! Bounded job queue with explicit pending-work accounting. `push` blocks
//! once the queue holds `capacity` items (usually `2 * N_workers`, spec
//! §5), `pop` blocks while empty, and both yield cooperatively via
//! `Condvar` rather than spinning — the direct analog of the original's
//! `pthread_mutex_t` + manual `lock()`/`unlock()` pairing.
//!
//! Closing the queue can't rely on every producer dropping its sender the
//! way `std::sync::mpsc` does, because the ingest pipeline's own workers
//! resubmit recursive jobs into the same queue (spec §4.7 recursion) — a
//! worker holding a sender for its whole lifetime would make the channel
//! never report "closed". Instead a `pending` counter tracks
//! submitted-but-not-yet-completed jobs: `push` increments it, `task_done`
//! (called once a worker has fully finished a job, including any recursive
//! jobs it pushed while handling it) decrements it. `pop` reports closed
//! (`None`) once `pending` reaches zero with the queue empty.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
};

struct Inner<T> {
    queue: VecDeque<T>,
    pending: usize,
}

pub struct JobQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> JobQueue<T> {
    pub fn new(capacity: usize) -> JobQueue<T> {
        JobQueue {
            inner: Mutex::new(Inner { queue: VecDeque::new(), pending: 0 }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueues `item`, blocking while the queue is at capacity.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        while inner.queue.len() >= self.capacity {
            inner = self.not_full.wait(inner).unwrap();
        }
        inner.queue.push_back(item);
        inner.pending += 1;
        self.not_empty.notify_one();
    }

    /// Blocks until a job is available, or returns `None` once no job is
    /// queued and no outstanding job remains that could still produce one
    /// (every in-flight job has called [JobQueue::task_done]).
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.queue.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.pending == 0 {
                self.not_empty.notify_all();
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Marks one job (previously returned by [JobQueue::pop]) as fully
    /// handled, including any recursive jobs it pushed back in.
    pub fn task_done(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending -= 1;
        if inner.pending == 0 {
            self.not_empty.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_then_pop_round_trips() {
        let queue: JobQueue<u32> = JobQueue::new(4);
        queue.push(7);
        assert_eq!(queue.pop(), Some(7));
        queue.task_done();
    }

    #[test]
    fn pop_returns_none_once_pending_reaches_zero() {
        let queue: JobQueue<u32> = JobQueue::new(4);
        queue.push(1);
        assert_eq!(queue.pop(), Some(1));
        queue.task_done();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn recursive_push_keeps_queue_open_until_child_completes() {
        let queue: JobQueue<u32> = JobQueue::new(4);
        queue.push(1);

        let job = queue.pop().unwrap();
        queue.push(job + 1); // simulate recursion before task_done
        queue.task_done();

        let child = queue.pop().unwrap();
        assert_eq!(child, 2);
        queue.task_done();
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn multiple_workers_drain_concurrently() {
        let queue = Arc::new(JobQueue::<u32>::new(8));
        for i in 0..20 {
            queue.push(i);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    let mut count = 0;
                    while let Some(_job) = queue.pop() {
                        queue.task_done();
                        count += 1;
                    }
                    count
                })
            })
            .collect();

        let total: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 20);
    }
}
