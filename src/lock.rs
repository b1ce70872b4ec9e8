//! Process-wide serialization of stdio swaps.
//!
//! The swap lock is re-entrant for the thread that owns it so a capture can
//! run inside another capture's callback on the same thread. Any other thread
//! waits until the owner has released every level.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug)]
struct Owner {
    thread: ThreadId,
    depth: usize,
}

pub(crate) struct SwapLock {
    owner: Mutex<Option<Owner>>,
    released: Condvar,
}

impl SwapLock {
    pub(crate) const fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
        }
    }

    // Nothing panics while this mutex is held, so poisoning carries no meaning.
    fn state(&self) -> MutexGuard<'_, Option<Owner>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the calling thread owns the lock, then take one level.
    pub(crate) fn acquire(&self) -> SwapGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            match state.as_mut() {
                None => {
                    *state = Some(Owner { thread: me, depth: 1 });
                    break;
                }
                Some(owner) if owner.thread == me => {
                    owner.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        SwapGuard { lock: self }
    }

    /// Whether the calling thread currently holds at least one level.
    pub(crate) fn held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        self.state().as_ref().is_some_and(|owner| owner.thread == me)
    }

    /// Nesting depth held by the calling thread (0 when not held).
    pub(crate) fn depth(&self) -> usize {
        let me = thread::current().id();
        match self.state().as_ref() {
            Some(owner) if owner.thread == me => owner.depth,
            _ => 0,
        }
    }

    fn release(&self) {
        let mut state = self.state();
        if let Some(owner) = state.as_mut() {
            owner.depth -= 1;
            if owner.depth == 0 {
                *state = None;
                drop(state);
                self.released.notify_one();
            }
        }
    }
}

/// One level of ownership of a [`SwapLock`], released on drop.
#[must_use = "the swap lock is released as soon as the guard is dropped"]
pub(crate) struct SwapGuard<'a> {
    lock: &'a SwapLock,
}

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
