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
use crate::promise::{Poll, Promise};
use std::mem;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskState {
    Unstarted,
    Started,
    Finished,
}

// Single-shot wrapper around one unit of deferred work. The starter runs
// exactly once; progression through the states is explicit and polled.
pub struct AsyncTask<T> {
    phase: Phase<T>,
}

enum Phase<T> {
    Unstarted(Box<dyn FnOnce() -> Promise<T> + Send>),
    Started(Promise<T>),
    // None when the underlying work was cancelled, or after take_result.
    Finished(Option<T>),
    Transition,
}

impl<T> AsyncTask<T> {
    pub fn new<F>(starter: F) -> Self
    where
        F: FnOnce() -> Promise<T> + Send + 'static,
    {
        Self {
            phase: Phase::Unstarted(Box::new(starter)),
        }
    }

    pub fn state(&self) -> TaskState {
        match &self.phase {
            Phase::Unstarted(_) => TaskState::Unstarted,
            Phase::Started(_) => TaskState::Started,
            Phase::Finished(_) => TaskState::Finished,
            Phase::Transition => unreachable!("task observed mid-transition"),
        }
    }

    /// Run the starter. Calling this twice is a programmer error.
    pub fn start(&mut self) {
        match mem::replace(&mut self.phase, Phase::Transition) {
            Phase::Unstarted(starter) => self.phase = Phase::Started(starter()),
            _ => panic!("AsyncTask::start called more than once"),
        }
    }

    /// Drive a started task toward completion.
    pub fn poll(&mut self) -> TaskState {
        if let Phase::Started(promise) = &mut self.phase {
            match promise.poll() {
                Poll::Pending => {}
                Poll::Ready(value) => self.phase = Phase::Finished(Some(value)),
                Poll::Cancelled => self.phase = Phase::Finished(None),
            }
        }
        self.state()
    }

    /// Take the result of a finished task; `None` means the work was
    /// cancelled. Calling this in any other state is a programmer error.
    pub fn take_result(&mut self) -> Option<T> {
        match mem::replace(&mut self.phase, Phase::Transition) {
            Phase::Finished(value) => {
                self.phase = Phase::Finished(None);
                value
            }
            _ => panic!("AsyncTask::take_result on an unfinished task"),
        }
    }
}
