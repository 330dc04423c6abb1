//! Deferred execution queue keyed by world time

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Entry ordered so the heap pops the earliest due time first
#[derive(Debug)]
struct Scheduled<T> {
    due: f64,
    /// Insertion order, breaks ties so equal due times run FIFO
    seq: u64,
    task: T,
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Time-ordered queue of pending tasks.
///
/// Tasks are pushed with an absolute due time and popped once the clock has
/// reached it. Tasks due at the same time come out in insertion order.
#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BinaryHeap<Scheduled<T>>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Scheduler {
            queue: BinaryHeap::new(),
            next_seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Queue a task to run at or after `due`
    pub fn push(&mut self, due: f64, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { due, seq, task });
    }

    /// Sequence number the next pushed task will get
    pub fn next_sequence(&self) -> u64 {
        self.next_seq
    }

    /// Pop the earliest task due at `now`
    pub fn pop_due(&mut self, now: f64) -> Option<T> {
        self.pop_due_before(now, u64::MAX)
    }

    /// Pop the earliest task due at `now` that was pushed before sequence `limit`.
    /// Later pushes wait for the next poll even when already due.
    pub fn pop_due_before(&mut self, now: f64, limit: u64) -> Option<T> {
        let head = self.queue.peek()?;
        if head.due > now {
            return None;
        }
        if head.seq >= limit {
            // Something pushed during this poll sits at the head. Hold it back
            // while still serving older due entries.
            let mut held = Vec::new();
            let mut found = None;
            while let Some(entry) = self.queue.peek() {
                if entry.due > now {
                    break;
                }
                let Some(entry) = self.queue.pop() else {
                    break;
                };
                if entry.seq < limit {
                    found = Some(entry.task);
                    break;
                }
                held.push(entry);
            }
            self.queue.extend(held);
            return found;
        }
        self.queue.pop().map(|entry| entry.task)
    }

    /// Due time of the earliest task
    pub fn next_due(&self) -> Option<f64> {
        self.queue.peek().map(|entry| entry.due)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
