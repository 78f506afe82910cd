// This file is part of Relief.
//
// Relief is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Relief is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Relief.  If not, see <http://www.gnu.org/licenses/>.
use crate::promise::{Deferred, Promise};
use anyhow::{ensure, Result};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

// Bounds the number of concurrently running tasks. A run below the bound
// starts on the calling thread immediately; everything else queues FIFO and
// is started when a running task completes. Completion is observed through
// the returned promise: when it resolves (or is dropped), its slot is
// released and the next pending run starts.
#[derive(Clone)]
pub struct PromiseThrottler {
    inner: Arc<Mutex<ThrottlerInner>>,
}

struct ThrottlerInner {
    max_concurrent: usize,
    running: usize,
    pending: VecDeque<PendingRun>,
}

struct PendingRun {
    start: Box<dyn FnOnce(SlotGuard) + Send>,
    cancel: Box<dyn FnOnce() + Send>,
}

// Holds one concurrency slot; releasing it starts the next pending run.
pub(crate) struct SlotGuard {
    inner: Arc<Mutex<ThrottlerInner>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let next = {
            let mut inner = self.inner.lock();
            inner.running -= 1;
            if inner.running < inner.max_concurrent {
                let run = inner.pending.pop_front();
                if run.is_some() {
                    inner.running += 1;
                }
                run
            } else {
                None
            }
        };
        // The starter runs outside the lock so that it may schedule more
        // work on this same throttler. The cancel callback goes first: once
        // the run starts it can no longer be cancelled.
        if let Some(run) = next {
            let PendingRun { start, cancel } = run;
            drop(cancel);
            start(SlotGuard {
                inner: self.inner.clone(),
            });
        }
    }
}

impl PromiseThrottler {
    pub fn new(max_concurrent: usize) -> Result<Self> {
        ensure!(max_concurrent > 0, "throttler requires at least one slot");
        Ok(Self {
            inner: Arc::new(Mutex::new(ThrottlerInner {
                max_concurrent,
                running: 0,
                pending: VecDeque::new(),
            })),
        })
    }

    /// Start `start` now if a slot is free, otherwise queue it. The
    /// returned promise resolves with the started work's result.
    pub fn run<T, F>(&self, start: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        self.run_with_cancel(start, || ())
    }

    /// Like `run`, with a callback invoked if the work is dropped by
    /// `cancel_all` before it ever started.
    pub fn run_with_cancel<T, F, C>(&self, start: F, on_cancel: C) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Promise<T> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.running < inner.max_concurrent {
            inner.running += 1;
            drop(inner);
            let mut promise = start();
            promise.attach_slot(SlotGuard {
                inner: self.inner.clone(),
            });
            return promise;
        }

        let state = Arc::new(Mutex::new(Deferred {
            started: None,
            cancelled: false,
            slot: None,
        }));
        let start_state = state.clone();
        let cancel_state = state.clone();
        inner.pending.push_back(PendingRun {
            start: Box::new(move |slot| {
                // Nothing can observe the result once the caller dropped its
                // promise; give the slot back without running.
                if Arc::strong_count(&start_state) == 1 {
                    drop(slot);
                    return;
                }
                let promise = start();
                let mut deferred = start_state.lock();
                deferred.started = Some(promise);
                deferred.slot = Some(slot);
            }),
            cancel: Box::new(move || {
                cancel_state.lock().cancelled = true;
                on_cancel();
            }),
        });
        drop(inner);
        Promise::deferred(state)
    }

    /// Drop every pending (not yet started) run, invoking its cancel
    /// callback. Running tasks are not interrupted.
    pub fn cancel_all(&self) {
        let dropped: Vec<_> = self.inner.lock().pending.drain(..).collect();
        for run in dropped {
            (run.cancel)();
        }
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }
}
