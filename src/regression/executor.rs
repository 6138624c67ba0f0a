//! Job execution
//!
//! Workers are pure functions of their job. An executor runs each job
//! exactly once and hands every result to a sink, tagged with the index of
//! the job that produced it, in whatever order jobs complete. The first
//! failure (from a worker or from the sink) aborts the run.

use crate::Result;

/// Runs independent jobs and streams their results.
pub trait ParallelExecutor {
    /// Apply `worker` to every job and pass `(job_index, result)` to `sink`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a worker or by the sink. Remaining
    /// jobs may or may not have run; their results are discarded.
    fn map_unordered<J, R, W, S>(&self, jobs: Vec<J>, worker: W, sink: S) -> Result<()>
    where
        J: Send,
        R: Send,
        W: Fn(J) -> Result<R> + Sync,
        S: FnMut(usize, R) -> Result<()>;
}

/// Runs jobs one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialExecutor;

impl ParallelExecutor for SerialExecutor {
    fn map_unordered<J, R, W, S>(&self, jobs: Vec<J>, worker: W, mut sink: S) -> Result<()>
    where
        J: Send,
        R: Send,
        W: Fn(J) -> Result<R> + Sync,
        S: FnMut(usize, R) -> Result<()>,
    {
        for (index, job) in jobs.into_iter().enumerate() {
            sink(index, worker(job)?)?;
        }
        Ok(())
    }
}

#[cfg(feature = "rayon")]
pub use parallel::RayonExecutor;

#[cfg(feature = "rayon")]
mod parallel {
    use super::ParallelExecutor;
    use crate::{Error, Result};
    use rayon::prelude::*;
    use std::sync::mpsc;

    /// Runs jobs on a rayon thread pool.
    ///
    /// Results travel to the calling thread over a bounded channel, so the
    /// sink runs on the caller and needs no synchronization.
    #[derive(Debug, Default)]
    pub struct RayonExecutor {
        pool: Option<rayon::ThreadPool>,
    }

    impl RayonExecutor {
        /// Use a dedicated pool of `threads` workers, or the global pool.
        ///
        /// # Errors
        ///
        /// Returns `Config` if the thread pool cannot be built.
        pub fn new(threads: Option<usize>) -> Result<Self> {
            let pool = match threads {
                Some(threads) => Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(threads)
                        .build()
                        .map_err(|e| Error::Config(format!("failed to build worker pool: {e}")))?,
                ),
                None => None,
            };
            Ok(Self { pool })
        }

        /// Number of worker threads jobs will run on.
        #[must_use]
        pub fn num_threads(&self) -> usize {
            self.pool
                .as_ref()
                .map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads)
        }
    }

    impl ParallelExecutor for RayonExecutor {
        fn map_unordered<J, R, W, S>(&self, jobs: Vec<J>, worker: W, mut sink: S) -> Result<()>
        where
            J: Send,
            R: Send,
            W: Fn(J) -> Result<R> + Sync,
            S: FnMut(usize, R) -> Result<()>,
        {
            let (tx, rx) = mpsc::sync_channel::<(usize, R)>(self.num_threads() * 2);
            let worker = &worker;
            let pool = self.pool.as_ref();

            std::thread::scope(|scope| {
                let producer = scope.spawn(move || {
                    let run = move || {
                        jobs.into_par_iter()
                            .enumerate()
                            .try_for_each_with(tx, |tx, (index, job)| {
                                let result = worker(job)?;
                                tx.send((index, result)).map_err(|_| {
                                    Error::Worker("result consumer stopped".to_string())
                                })
                            })
                    };
                    match pool {
                        Some(pool) => pool.install(run),
                        None => run(),
                    }
                });

                let mut consumed = Ok(());
                for (index, result) in rx {
                    if let Err(e) = sink(index, result) {
                        consumed = Err(e);
                        break;
                    }
                }
                let produced = producer
                    .join()
                    .map_err(|_| Error::Worker("worker thread panicked".to_string()))?;
                consumed.and(produced)
            })
        }
    }
}
