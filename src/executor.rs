//! Minimal task executor interface used by the BVH builder.
//!
//! The builder only needs two capabilities: running a function over disjoint parts of
//! a range, and forking two independent units of work and joining them.

use std::num::NonZeroUsize;
use std::ops::Range;

use rayon::prelude::*;

/// How many chunks to cut a range into per worker, to even out uneven work.
const CHUNKS_PER_WORKER: usize = 4;

#[derive(Copy, Clone, Debug, Default)]
pub enum WorkerCount {
    #[default]
    Auto,
    Manual(NonZeroUsize),
}

impl WorkerCount {
    pub fn get(self) -> usize {
        match self {
            WorkerCount::Auto => num_cpus::get(),
            WorkerCount::Manual(num) => num.get(),
        }
    }
}

pub trait Executor: Sync {
    /// Number of threads that may run work concurrently.
    fn worker_count(&self) -> usize;

    /// Calls `f` on disjoint sub-ranges that together cover `range`, possibly in parallel.
    fn for_each<F>(&self, range: Range<usize>, f: F)
    where
        F: Fn(Range<usize>) + Sync + Send;

    /// Calls `f(offset, chunk)` on disjoint chunks of `data`, possibly in parallel.
    /// `offset` is the position of `chunk[0]` within `data`.
    fn for_each_mut<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send;

    /// Runs both closures, possibly in parallel, and waits for both to finish.
    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send;

    fn is_parallel(&self) -> bool {
        self.worker_count() > 1
    }
}

/// Runs everything on the calling thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct SequentialExecutor;

impl Executor for SequentialExecutor {
    fn worker_count(&self) -> usize {
        1
    }

    fn for_each<F>(&self, range: Range<usize>, f: F)
    where
        F: Fn(Range<usize>) + Sync + Send,
    {
        if !range.is_empty() {
            f(range)
        }
    }

    fn for_each_mut<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        if !data.is_empty() {
            f(0, data)
        }
    }

    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        (a(), b())
    }
}

/// Work stealing executor backed by its own thread pool.
#[derive(Debug)]
pub struct ParallelExecutor {
    pool: rayon::ThreadPool,
}

impl ParallelExecutor {
    pub fn new(worker_count: WorkerCount) -> Result<ParallelExecutor, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count.get())
            .thread_name(|worker_id| format!("worker{worker_id}"))
            .build()?;
        Ok(ParallelExecutor { pool })
    }

    fn chunk_size(&self, len: usize) -> usize {
        len.div_ceil(self.worker_count() * CHUNKS_PER_WORKER).max(1)
    }
}

impl Executor for ParallelExecutor {
    fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn for_each<F>(&self, range: Range<usize>, f: F)
    where
        F: Fn(Range<usize>) + Sync + Send,
    {
        let chunk_size = self.chunk_size(range.len());
        let chunk_count = range.len().div_ceil(chunk_size);
        self.pool.install(|| {
            (0..chunk_count).into_par_iter().for_each(|i| {
                let start = range.start + i * chunk_size;
                let end = (start + chunk_size).min(range.end);
                f(start..end)
            })
        })
    }

    fn for_each_mut<T, F>(&self, data: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync + Send,
    {
        let chunk_size = self.chunk_size(data.len());
        self.pool.install(|| {
            data.par_chunks_mut(chunk_size)
                .enumerate()
                .for_each(|(i, chunk)| f(i * chunk_size, chunk))
        })
    }

    fn join<A, B, RA, RB>(&self, a: A, b: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        self.pool.join(a, b)
    }
}
