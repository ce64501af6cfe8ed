//! The worker pool.
//!
//! The calling (audio) thread is worker 0. Workers `1..num_threads` are persistent threads parked
//! on a condition variable between periods. For every period the audio thread resets the
//! tracks, arms each worker's [Handoff], wakes it and then renders alongside the workers. Every
//! worker scans its rotation of the track order and claims whatever is still unclaimed, so the
//! period is done once every handoff is released.
use std::{
    fmt,
    ptr::null_mut,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use automation::Automation;
use crossbeam::queue::ArrayQueue;
use timing::SamplePeriod;
use util::sync::{Handoff, SpinOutcome, SpinPolicy};

use crate::{TrackGraph, TrackSet};

pub struct Options {
    /// Total threads rendering, the calling thread included.
    pub num_threads: usize,
    /// How long a track waits for its producers before giving up.
    pub bus_wait: SpinPolicy,
    /// SCHED_FIFO priority for the workers, if any.
    pub rt_priority: Option<i32>,
    pub diagnostics_capacity: usize,
}

/// Everything a period needs. Borrowed by the workers for the duration of [WorkerPool::run].
pub struct Job<'a> {
    pub tracks: &'a TrackSet,
    pub graph: &'a TrackGraph,
    pub automation: &'a Automation,
    pub period: &'a SamplePeriod,
    /// The track whose buffer the caller reads after the period. It is left uncleared.
    pub output: usize,
}

/// A fault noticed on the audio path. Queued without allocating, logged elsewhere.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Diagnostic {
    BusTimeout {
        track: usize,
        spins: u64,
        elapsed: Duration,
    },
    EventsDropped {
        track: usize,
        count: u64,
    },
    TicksDropped {
        count: u64,
    },
}

/// Running totals of everything reported since the pool started.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub bus_timeouts: u64,
    pub dropped_events: u64,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

struct Shared {
    workers: Box<[Worker]>,
    job: AtomicPtr<()>,
    exit: AtomicBool,
    bus_wait: SpinPolicy,
    diagnostics: Arc<ArrayQueue<Diagnostic>>,
    bus_timeouts: AtomicU64,
    dropped_events: AtomicU64,
}

struct Worker {
    handoff: Handoff,
    generation: Mutex<u64>,
    wake: Condvar,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_threads: 1,
            bus_wait: SpinPolicy::default(),
            rt_priority: None,
            diagnostics_capacity: 256,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusTimeout {
                track,
                spins,
                elapsed,
            } => write!(
                f,
                "track {track} gave up waiting for its bus inputs after {spins} spins ({elapsed:?})"
            ),
            Self::EventsDropped { track, count } => {
                write!(f, "track {track} dropped {count} events, event list full")
            }
            Self::TicksDropped { count } => {
                write!(f, "dropped {count} automation ticks, tick list full")
            }
        }
    }
}

impl Worker {
    fn notify(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.wake.notify_one();
    }
}

impl WorkerPool {
    pub fn new(options: Options) -> Self {
        let num_workers = options.num_threads.max(1) - 1;
        let shared = Arc::new(Shared {
            workers: (0..num_workers)
                .map(|_| Worker {
                    handoff: Handoff::new(),
                    generation: Mutex::new(0),
                    wake: Condvar::new(),
                })
                .collect(),
            job: AtomicPtr::new(null_mut()),
            exit: AtomicBool::new(false),
            bus_wait: options.bus_wait,
            diagnostics: Arc::new(ArrayQueue::new(options.diagnostics_capacity.max(1))),
            bus_timeouts: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        });

        let mut threads = Vec::with_capacity(num_workers);
        for index in 1..=num_workers {
            let name = format!("cadence-worker-{index}");
            let spawned = std::thread::Builder::new().name(name.clone()).spawn({
                let shared = shared.clone();
                let priority = options.rt_priority;
                move || shared.worker_thread(index, &name, priority)
            });
            match spawned {
                Ok(thread) => threads.push(thread),
                Err(error) => {
                    tracing::warn!(
                        "failed to spawn worker {index}: {error}, rendering with {} threads",
                        threads.len() + 1
                    );
                    break;
                }
            }
        }
        tracing::info!("worker pool started with {} threads", threads.len() + 1);
        Self { shared, threads }
    }

    /// Threads rendering each period, the caller included.
    pub fn num_threads(&self) -> usize {
        self.threads.len() + 1
    }

    /// The queue real-time faults are reported on.
    pub fn diagnostics(&self) -> Arc<ArrayQueue<Diagnostic>> {
        self.shared.diagnostics.clone()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        self.shared.report(diagnostic);
    }

    pub fn counters(&self) -> Counters {
        Counters {
            bus_timeouts: self.shared.bus_timeouts.load(Ordering::Relaxed),
            dropped_events: self.shared.dropped_events.load(Ordering::Relaxed),
        }
    }

    /// Render one period on every thread and return once all tracks are processed.
    pub fn run(&self, job: &Job<'_>) {
        debug_assert_eq!(job.tracks.len(), job.graph.num_tracks());
        job.tracks.reset(job.graph);
        self.shared
            .job
            .store(job as *const Job<'_> as *mut (), Ordering::Release);

        let workers = &self.shared.workers[..self.threads.len()];
        for worker in workers {
            worker.handoff.arm();
            worker.notify();
        }
        self.shared.work(job, 0);
        for worker in workers {
            worker.handoff.wait_idle();
        }
        self.shared.job.store(null_mut(), Ordering::Relaxed);
    }

    /// Stop and join every worker. Called on drop.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.shared.exit.store(true, Ordering::Release);
        for worker in self.shared.workers.iter() {
            worker.notify();
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::warn!("a worker thread panicked");
            }
        }
        tracing::debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::BusTimeout { .. } => {
                self.bus_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Diagnostic::EventsDropped { count, .. } | Diagnostic::TicksDropped { count } => {
                self.dropped_events.fetch_add(count, Ordering::Relaxed);
            }
        }
        // Full queue: the oldest report goes.
        let _ = self.diagnostics.force_push(diagnostic);
    }

    fn worker_thread(&self, index: usize, name: &str, priority: Option<i32>) {
        if let Some(priority) = priority {
            if let Err(error) = util::thread::promote_to_realtime(name, priority) {
                tracing::warn!("{error}, {name} keeps normal scheduling");
            }
        }
        let worker = &self.workers[index - 1];
        let mut seen = 0;
        loop {
            {
                let mut generation = worker
                    .generation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                while *generation == seen {
                    generation = worker
                        .wake
                        .wait(generation)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                seen = *generation;
            }
            if self.exit.load(Ordering::Acquire) {
                break;
            }
            let job = self.job.load(Ordering::Acquire);
            if !job.is_null() {
                // The pointer stays valid until every handoff is released.
                let job = unsafe { &*(job as *const Job<'_>) };
                self.work(job, index);
            }
            worker.handoff.release();
        }
    }

    fn work(&self, job: &Job<'_>, worker: usize) {
        for index in job.graph.worker_order(worker) {
            let Some(track) = job.tracks.get(index) else {
                continue;
            };
            if !track.try_claim() {
                continue;
            }
            if let SpinOutcome::TimedOut { spins, elapsed } = track.wait_for_bus(&self.bus_wait) {
                self.report(Diagnostic::BusTimeout {
                    track: index,
                    spins,
                    elapsed,
                });
            }
            let report = unsafe { track.process(job) };
            if report.dropped_events > 0 {
                self.report(Diagnostic::EventsDropped {
                    track: index,
                    count: report.dropped_events,
                });
            }
        }
    }
}
