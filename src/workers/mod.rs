//! Bounded parallel execution of pack/unpack tasks.
//!
//! A [`Pool`] runs one task per item and hands results back in item order. The
//! confined flavour feeds a fixed worker team through a bounded channel and
//! gates every task on a [`Confine`] token; the unconfined flavour starts one
//! thread per item and exists for comparison and benchmarking.

mod cancel;
mod confine;

pub use cancel::CancelToken;
pub use confine::{Confine, Permit};

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ScopedJoinHandle};

use crossbeam_channel::bounded;
use tracing::trace;

use crate::config::Config;
use crate::error::{Result, SealError};

#[derive(Debug)]
pub enum Pool {
    /// At most `confine.capacity()` tasks in flight, served by up to `threads` workers.
    Confined { confine: Confine, threads: usize },
    /// One thread per task, no backpressure.
    Unconfined,
}

/// Stop conditions shared by every worker of one `run`.
struct Gate<'a> {
    cancel: &'a CancelToken,
    abort: AtomicBool,
}

impl Gate<'_> {
    fn closed(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.cancel.is_cancelled()
    }

    fn settle<R>(&self, slot: &mut Option<Result<R>>, result: Result<R>) {
        if result.is_err() {
            self.abort.store(true, Ordering::Relaxed);
        }
        *slot = Some(result);
    }
}

impl Pool {
    pub fn confined(capacity: usize, threads: usize) -> Self {
        Pool::Confined { confine: Confine::new(capacity), threads: threads.max(1) }
    }

    pub fn unconfined() -> Self {
        Pool::Unconfined
    }

    /// File-level pool for one pack/unpack call.
    pub fn for_files(config: &Config) -> Self {
        if config.confined {
            Self::confined(config.confine_files, config.thread_budget())
        } else {
            Self::unconfined()
        }
    }

    /// Chunk-level pool for one file.
    pub fn for_chunks(config: &Config) -> Self {
        if config.confined {
            Self::confined(config.confine_buffers, config.thread_budget())
        } else {
            Self::unconfined()
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match self {
            Pool::Confined { confine, .. } => Some(confine.capacity()),
            Pool::Unconfined => None,
        }
    }

    /// Highest number of concurrent tasks observed; unconfined pools do not track it.
    pub fn peak(&self) -> Option<usize> {
        match self {
            Pool::Confined { confine, .. } => Some(confine.peak()),
            Pool::Unconfined => None,
        }
    }

    /// Run `task(index, item)` for every item and return the results in item order.
    ///
    /// Blocks until every started task has finished. The first failing task (by
    /// index) decides the error; once any task fails, or `cancel` trips, tasks
    /// that have not started yet are skipped, and skipped work with no other
    /// failure surfaces as [`SealError::Cancelled`].
    pub fn run<T, R, F>(&self, items: Vec<T>, cancel: &CancelToken, task: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R> + Sync,
    {
        cancel.check()?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let mut slots: Vec<Option<Result<R>>> = items.iter().map(|_| None).collect();
        let gate = Gate { cancel, abort: AtomicBool::new(false) };
        match self {
            Pool::Confined { confine, threads } => {
                run_confined(confine, *threads, items, &mut slots, &gate, &task)?
            }
            Pool::Unconfined => run_unconfined(items, &mut slots, &gate, &task)?,
        }
        collect(slots)
    }
}

fn run_confined<T, R, F>(
    confine: &Confine,
    threads: usize,
    items: Vec<T>,
    slots: &mut [Option<Result<R>>],
    gate: &Gate<'_>,
    task: &F,
) -> Result<()>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R> + Sync,
{
    // The team may outnumber the tokens; `confine` holds the extra workers back.
    let team = threads.min(items.len()).max(1);
    trace!(team, capacity = confine.capacity(), tasks = items.len(), "starting confined run");

    thread::scope(|s| {
        let (jobs, queue) = bounded::<(usize, T, &mut Option<Result<R>>)>(team);
        let mut handles = Vec::with_capacity(team);
        let mut spawn_err: Option<io::Error> = None;

        for i in 0..team {
            let queue = queue.clone();
            let spawned = thread::Builder::new()
                .name(format!("bulkseal-worker-{i}"))
                .spawn_scoped(s, move || {
                    for (idx, item, slot) in queue {
                        if gate.closed() {
                            continue;
                        }
                        let _permit = confine.acquire();
                        gate.settle(slot, task(idx, item));
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    spawn_err = Some(e);
                    break;
                }
            }
        }
        drop(queue);

        let no_workers = handles.is_empty();
        for ((idx, item), slot) in items.into_iter().enumerate().zip(slots.iter_mut()) {
            // Fails only when every worker is gone.
            if jobs.send((idx, item, slot)).is_err() {
                break;
            }
        }
        drop(jobs);

        join_all(handles)?;
        match spawn_err {
            Some(e) if no_workers => Err(SealError::Spawn(e)),
            _ => Ok(()),
        }
    })
}

fn run_unconfined<T, R, F>(
    items: Vec<T>,
    slots: &mut [Option<Result<R>>],
    gate: &Gate<'_>,
    task: &F,
) -> Result<()>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R> + Sync,
{
    trace!(tasks = items.len(), "starting unconfined run");

    thread::scope(|s| {
        let mut handles = Vec::with_capacity(items.len());
        let mut spawn_err: Option<io::Error> = None;

        for ((idx, item), slot) in items.into_iter().enumerate().zip(slots.iter_mut()) {
            let spawned = thread::Builder::new().spawn_scoped(s, move || {
                if !gate.closed() {
                    gate.settle(slot, task(idx, item));
                }
            });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    gate.abort.store(true, Ordering::Relaxed);
                    spawn_err = Some(e);
                    break;
                }
            }
        }

        join_all(handles)?;
        match spawn_err {
            Some(e) => Err(SealError::Spawn(e)),
            None => Ok(()),
        }
    })
}

fn join_all(handles: Vec<ScopedJoinHandle<'_, ()>>) -> Result<()> {
    let mut panicked = false;
    for handle in handles {
        panicked |= handle.join().is_err();
    }
    if panicked { Err(SealError::WorkerPanicked) } else { Ok(()) }
}

fn collect<R>(slots: Vec<Option<Result<R>>>) -> Result<Vec<R>> {
    let mut out = Vec::with_capacity(slots.len());
    let mut skipped = false;
    for slot in slots {
        match slot {
            Some(Ok(value)) => out.push(value),
            Some(Err(e)) => return Err(e),
            None => skipped = true,
        }
    }
    if skipped { Err(SealError::Cancelled) } else { Ok(out) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    fn pools() -> Vec<Pool> {
        vec![Pool::confined(3, 4), Pool::confined(1, 1), Pool::unconfined()]
    }

    #[test]
    fn results_keep_item_order() {
        for pool in pools() {
            let items: Vec<u32> = (0..50).collect();
            let out = pool
                .run(items, &CancelToken::new(), |idx, v| {
                    // Later items finish first.
                    thread::sleep(Duration::from_micros((50 - v as u64) * 20));
                    Ok((idx, v * 2))
                })
                .unwrap();
            for (i, (idx, doubled)) in out.into_iter().enumerate() {
                assert_eq!(idx, i);
                assert_eq!(doubled, i as u32 * 2);
            }
        }
    }

    #[test]
    fn empty_input_runs_nothing() {
        let out: Vec<u8> = Pool::confined(2, 2)
            .run(Vec::<u8>::new(), &CancelToken::new(), |_, v| Ok(v))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn confined_peak_stays_within_capacity() {
        // More workers than tokens, so the semaphore is what bounds the run.
        let pool = Pool::confined(2, 8);
        let live = AtomicUsize::new(0);
        let seen = AtomicUsize::new(0);
        let workers = Mutex::new(HashSet::new());
        pool.run((0..32).collect::<Vec<_>>(), &CancelToken::new(), |_, _| {
            workers.lock().unwrap().insert(thread::current().id());
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            seen.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(seen.load(Ordering::SeqCst) <= 2);
        assert!(workers.lock().unwrap().len() > 2);
        assert_eq!(pool.peak(), Some(2));
    }

    #[test]
    fn first_error_by_index_wins() {
        for pool in pools() {
            let err = pool
                .run((0..20).collect::<Vec<_>>(), &CancelToken::new(), |idx, _| {
                    if idx == 7 {
                        Err(SealError::CorruptPadding)
                    } else {
                        Ok(idx)
                    }
                })
                .unwrap_err();
            assert!(matches!(err, SealError::CorruptPadding), "{err:?}");
        }
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let calls = AtomicUsize::new(0);
        let err = Pool::confined(2, 2)
            .run(vec![1, 2, 3], &token, |_, v| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            })
            .unwrap_err();
        assert!(matches!(err, SealError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_between_tasks() {
        let token = CancelToken::new();
        let err = Pool::confined(1, 1)
            .run((0..10).collect::<Vec<_>>(), &token, |idx, v| {
                if idx == 2 {
                    token.cancel();
                }
                Ok(v)
            })
            .unwrap_err();
        assert!(matches!(err, SealError::Cancelled));
    }

    #[test]
    fn panicking_task_is_reported() {
        for pool in [Pool::confined(2, 2), Pool::unconfined()] {
            let err = pool
                .run(vec![0, 1, 2], &CancelToken::new(), |_, v: i32| {
                    if v == 1 {
                        panic!("boom");
                    }
                    Ok(v)
                })
                .unwrap_err();
            assert!(matches!(err, SealError::WorkerPanicked));
        }
    }

    #[test]
    fn pool_from_config() {
        let config = Config { confine_files: 4, confine_buffers: 16, ..Config::default() };
        assert_eq!(Pool::for_files(&config).capacity(), Some(4));
        assert_eq!(Pool::for_chunks(&config).capacity(), Some(16));

        let config = Config { confined: false, ..config };
        assert_eq!(Pool::for_files(&config).capacity(), None);
    }
}
