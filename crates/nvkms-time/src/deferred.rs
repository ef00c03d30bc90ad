use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;

use crate::timer_queue::{TimerId, TimerQueue};

pub type DeferredCallback<T> = Box<dyn FnOnce(&mut T)>;

struct Deferred<T> {
    target: Weak<RefCell<T>>,
    callback: DeferredCallback<T>,
}

/// Timer service whose callbacks hold only a weak reference to their target.
///
/// Timers are fired by [`run_due`], which pops each due timer before invoking it so a callback
/// may freely allocate or cancel timers on the same service.
pub struct DeferredTimers<T> {
    queue: TimerQueue<Deferred<T>>,
}

impl<T> Default for DeferredTimers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DeferredTimers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTimers")
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl<T> DeferredTimers<T> {
    pub fn new() -> Self {
        Self {
            queue: TimerQueue::new(),
        }
    }

    pub fn alloc(
        &mut self,
        target: Weak<RefCell<T>>,
        deadline_ns: u64,
        callback: impl FnOnce(&mut T) + 'static,
    ) -> TimerId {
        self.queue.schedule(
            deadline_ns,
            Deferred {
                target,
                callback: Box::new(callback),
            },
        )
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.queue.cancel(id)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.queue.is_pending(id)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn next_deadline_ns(&mut self) -> Option<u64> {
        self.queue.next_deadline_ns()
    }
}

/// Fires every timer due at `now_ns`. Returns how many callbacks actually ran.
///
/// A timer whose target has been dropped is discarded silently. A target that is already
/// mutably borrowed (re-entrant firing) is skipped with a warning.
pub fn run_due<T>(timers: &RefCell<DeferredTimers<T>>, now_ns: u64) -> usize {
    let mut fired = 0;
    loop {
        let due = timers.borrow_mut().queue.pop_due(now_ns);
        let Some(event) = due else {
            break;
        };
        let Deferred { target, callback } = event.payload;
        let Some(target) = target.upgrade() else {
            tracing::debug!(timer = ?event.id, "deferred timer target gone; dropping");
            continue;
        };
        let Ok(mut guard) = target.try_borrow_mut() else {
            tracing::warn!(timer = ?event.id, "deferred timer target busy; dropping");
            continue;
        };
        callback(&mut *guard);
        fired += 1;
    }
    fired
}
