use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEvent<T> {
    pub id: TimerId,
    pub deadline_ns: u64,
    pub payload: T,
}

/// Deadline-ordered queue of one-shot timers.
///
/// Timers with equal deadlines fire in scheduling order. Cancellation is lazy: the heap entry
/// stays behind and is discarded when it reaches the front.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_id: u64,
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    pending: HashMap<u64, (u64, T)>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn schedule(&mut self, deadline_ns: u64, payload: T) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.heap.push(Reverse((deadline_ns, id)));
        self.pending.insert(id, (deadline_ns, payload));
        TimerId(id)
    }

    /// Returns `true` if the timer was still pending.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id.0).is_some()
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains_key(&id.0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline_ns(&mut self) -> Option<u64> {
        self.discard_cancelled();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pops the earliest timer whose deadline is at or before `now_ns`.
    pub fn pop_due(&mut self, now_ns: u64) -> Option<TimerEvent<T>> {
        self.discard_cancelled();
        let &Reverse((deadline_ns, id)) = self.heap.peek()?;
        if deadline_ns > now_ns {
            return None;
        }
        self.heap.pop();
        let (deadline_ns, payload) = self.pending.remove(&id)?;
        Some(TimerEvent {
            id: TimerId(id),
            deadline_ns,
            payload,
        })
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.pending.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pops_in_deadline_then_schedule_order() {
        let mut q = TimerQueue::new();
        q.schedule(30, "c");
        q.schedule(10, "a");
        q.schedule(10, "b");

        assert_eq!(q.pop_due(5), None);
        let drained: Vec<_> = std::iter::from_fn(|| q.pop_due(100))
            .map(|ev| ev.payload)
            .collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(q.is_empty());
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut q = TimerQueue::new();
        let a = q.schedule(10, 1u32);
        let b = q.schedule(20, 2u32);

        assert!(q.cancel(a));
        assert!(!q.cancel(a));
        assert!(!q.is_pending(a));
        assert!(q.is_pending(b));
        assert_eq!(q.next_deadline_ns(), Some(20));

        let ev = q.pop_due(u64::MAX).expect("b is due");
        assert_eq!(ev.id, b);
        assert_eq!(ev.deadline_ns, 20);
        assert_eq!(q.pop_due(u64::MAX), None);
    }
}
