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
use crate::promise::{Promise, PromiseSender};
use anyhow::{ensure, Result};
use crossbeam::channel::{unbounded, Sender};
use log::warn;
use std::{sync::Arc, thread};

// A fixed set of dedicated worker threads. Jobs move into a worker by value
// and results move back through the job's promise; no buffer is ever shared
// between threads.
pub struct WorkerPool<J, R> {
    tx: Sender<Job<J, R>>,
    workers: Vec<thread::JoinHandle<()>>,
}

struct Job<J, R> {
    input: J,
    done: PromiseSender<R>,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F>(name: &str, threads: usize, work: F) -> Result<Self>
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        ensure!(threads > 0, "worker pool requires at least one thread");
        let (tx, rx) = unbounded::<Job<J, R>>();
        let work = Arc::new(work);
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let work = work.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job.done.resolve((work)(job.input));
                        }
                    })?,
            );
        }
        Ok(Self { tx, workers })
    }

    pub fn dispatch(&self, input: J) -> Promise<R> {
        let (done, promise) = Promise::channel();
        if self.tx.send(Job { input, done }).is_err() {
            // Every worker died; the dropped sender cancels the promise.
            warn!("dispatch to dead worker pool");
        }
        promise
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::promise::Poll;
    use std::time::{Duration, Instant};

    fn poll_until<T>(promise: &mut Promise<T>) -> Poll<T> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match promise.poll() {
                Poll::Pending => {
                    assert!(Instant::now() < deadline, "worker result never arrived");
                    thread::yield_now();
                }
                done => return done,
            }
        }
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(WorkerPool::<u32, u32>::new("w", 0, |v| v).is_err());
    }

    #[test]
    fn test_round_trips_ownership() {
        let pool = WorkerPool::new("sum", 2, |v: Vec<f32>| v.iter().sum::<f32>()).unwrap();
        let mut a = pool.dispatch(vec![1.0, 2.0, 3.0]);
        let mut b = pool.dispatch(vec![10.0; 4]);
        assert!(matches!(poll_until(&mut a), Poll::Ready(s) if s == 6.0));
        assert!(matches!(poll_until(&mut b), Poll::Ready(s) if s == 40.0));
    }

    #[test]
    fn test_many_jobs_drain() {
        let pool = WorkerPool::new("sq", 3, |v: u64| v * v).unwrap();
        let mut promises: Vec<_> = (0..64u64).map(|v| pool.dispatch(v)).collect();
        for (i, p) in promises.iter_mut().enumerate() {
            assert!(matches!(poll_until(p), Poll::Ready(sq) if sq == (i * i) as u64));
        }
    }
}
