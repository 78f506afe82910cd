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
use crate::throttler::SlotGuard;
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Observation of a promise at one poll point.
#[derive(Debug)]
pub enum Poll<T> {
    Pending,
    Ready(T),
    /// The producer went away without resolving: the work was cancelled
    /// before it started, or the producing thread died.
    Cancelled,
}

// One-shot completion handle. Resolution is observed by polling from the
// owning side; the producing side resolves exactly once through a
// PromiseSender, possibly from another thread. Buffers move through the
// channel by value, so the two sides never alias.
pub struct Promise<T> {
    inner: Inner<T>,
    slot: Option<SlotGuard>,
}

enum Inner<T> {
    Ready(Option<T>),
    Channel(Receiver<T>),
    Deferred(Arc<Mutex<Deferred<T>>>),
    Done,
}

// State shared with a throttler for a run that has not been started yet.
pub(crate) struct Deferred<T> {
    pub(crate) started: Option<Promise<T>>,
    pub(crate) cancelled: bool,
    pub(crate) slot: Option<SlotGuard>,
}

pub struct PromiseSender<T> {
    tx: Sender<T>,
}

impl<T> PromiseSender<T> {
    /// Resolve the matching promise. If the promise was dropped in the
    /// interim the value is discarded; late arrivals have no observer.
    pub fn resolve(self, value: T) {
        self.tx.send(value).ok();
    }
}

impl<T> Promise<T> {
    /// A promise that is already resolved.
    pub fn ready(value: T) -> Self {
        Self {
            inner: Inner::Ready(Some(value)),
            slot: None,
        }
    }

    /// A promise resolved later through the returned sender.
    pub fn channel() -> (PromiseSender<T>, Self) {
        let (tx, rx) = bounded(1);
        (
            PromiseSender { tx },
            Self {
                inner: Inner::Channel(rx),
                slot: None,
            },
        )
    }

    pub(crate) fn deferred(state: Arc<Mutex<Deferred<T>>>) -> Self {
        Self {
            inner: Inner::Deferred(state),
            slot: None,
        }
    }

    pub(crate) fn attach_slot(&mut self, slot: SlotGuard) {
        self.slot = Some(slot);
    }

    /// Check for completion. Returns `Ready` exactly once; polling after
    /// completion is a programmer error.
    pub fn poll(&mut self) -> Poll<T> {
        let out = match &mut self.inner {
            Inner::Ready(value) => Poll::Ready(value.take().expect("ready promise re-polled")),
            Inner::Channel(rx) => match rx.try_recv() {
                Ok(value) => Poll::Ready(value),
                Err(TryRecvError::Empty) => Poll::Pending,
                Err(TryRecvError::Disconnected) => Poll::Cancelled,
            },
            Inner::Deferred(state) => {
                let mut state = state.lock();
                if state.cancelled {
                    state.slot = None;
                    Poll::Cancelled
                } else if let Some(started) = state.started.as_mut() {
                    let polled = started.poll();
                    if !matches!(polled, Poll::Pending) {
                        state.slot = None;
                    }
                    polled
                } else {
                    Poll::Pending
                }
            }
            Inner::Done => panic!("promise polled after completion"),
        };
        if !matches!(out, Poll::Pending) {
            self.inner = Inner::Done;
            self.slot = None;
        }
        out
    }

    pub fn is_done(&self) -> bool {
        matches!(self.inner, Inner::Done)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ready_resolves_immediately() {
        let mut p = Promise::ready(42);
        assert!(matches!(p.poll(), Poll::Ready(42)));
        assert!(p.is_done());
    }

    #[test]
    fn test_channel_pending_until_sent() {
        let (tx, mut p) = Promise::channel();
        assert!(matches!(p.poll(), Poll::Pending));
        tx.resolve("done");
        assert!(matches!(p.poll(), Poll::Ready("done")));
    }

    #[test]
    fn test_dropped_sender_cancels() {
        let (tx, mut p) = Promise::<u32>::channel();
        drop(tx);
        assert!(matches!(p.poll(), Poll::Cancelled));
    }

    #[test]
    fn test_cross_thread_resolution() {
        let (tx, mut p) = Promise::channel();
        let handle = std::thread::spawn(move || tx.resolve(vec![1f32, 2f32]));
        handle.join().unwrap();
        assert!(matches!(p.poll(), Poll::Ready(v) if v == vec![1f32, 2f32]));
    }

    #[test]
    #[should_panic(expected = "polled after completion")]
    fn test_poll_after_completion_panics() {
        let mut p = Promise::ready(1);
        let _ = p.poll();
        let _ = p.poll();
    }
}
