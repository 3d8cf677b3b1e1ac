//! Fixed-size thread pool that runs the fetcher over every identifier.

use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    thread,
};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::RuntimeConfig;
use crate::fetcher::{FetchOutcome, VideoFetcher};
use crate::joblist::{partition, read_job_list};
use crate::source::YtDlpSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Dispatch {
    /// Workers pull one identifier at a time from a shared FIFO.
    #[default]
    Queue,
    /// Each worker owns one contiguous chunk from [`partition`].
    Static,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub downloaded: usize,
    pub already_present: usize,
    pub collisions: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub discarded: usize,
    /// Tasks that panicked. The worker kept going.
    pub panicked: usize,
    /// Worker threads that died outside a task.
    pub lost_workers: usize,
}

impl PoolReport {
    fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Downloaded => self.downloaded += 1,
            FetchOutcome::AlreadyPresent => self.already_present += 1,
            FetchOutcome::Collision => self.collisions += 1,
            FetchOutcome::Unavailable => self.unavailable += 1,
            FetchOutcome::Failed(_) => self.failed += 1,
            FetchOutcome::Discarded => self.discarded += 1,
        }
    }

    fn merge(&mut self, other: PoolReport) {
        self.downloaded += other.downloaded;
        self.already_present += other.already_present;
        self.collisions += other.collisions;
        self.unavailable += other.unavailable;
        self.failed += other.failed;
        self.discarded += other.discarded;
        self.panicked += other.panicked;
        self.lost_workers += other.lost_workers;
    }

    pub fn processed(&self) -> usize {
        self.downloaded
            + self.already_present
            + self.collisions
            + self.unavailable
            + self.failed
            + self.discarded
            + self.panicked
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
    dispatch: Dispatch,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            dispatch: Dispatch::default(),
        }
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `task` once per identifier and blocks until every worker has
    /// finished. There is no cancellation: a hung task holds its worker.
    pub fn run<F>(&self, ids: &[String], task: F) -> PoolReport
    where
        F: Fn(&str) -> FetchOutcome + Sync,
    {
        if ids.is_empty() {
            return PoolReport::default();
        }
        match self.dispatch {
            Dispatch::Queue => self.run_queue(ids, &task),
            Dispatch::Static => self.run_static(ids, &task),
        }
    }

    fn run_queue<F>(&self, ids: &[String], task: &F) -> PoolReport
    where
        F: Fn(&str) -> FetchOutcome + Sync,
    {
        let worker_count = self.workers.min(ids.len());
        let queue: Mutex<VecDeque<&str>> = Mutex::new(ids.iter().map(String::as_str).collect());
        info!(
            "processing {} identifiers on {} workers",
            ids.len(),
            worker_count
        );

        thread::scope(|scope| {
            let handles: Vec<_> = (0..worker_count)
                .map(|worker| {
                    let queue = &queue;
                    scope.spawn(move || {
                        let mut report = PoolReport::default();
                        loop {
                            // Release the lock before running the task.
                            let next = queue.lock().pop_front();
                            let Some(id) = next else {
                                break;
                            };
                            run_task(worker, id, task, &mut report);
                        }
                        report
                    })
                })
                .collect();
            join_all(handles)
        })
    }

    fn run_static<F>(&self, ids: &[String], task: &F) -> PoolReport
    where
        F: Fn(&str) -> FetchOutcome + Sync,
    {
        let chunks = partition(ids, self.workers);
        info!(
            "processing {} identifiers in {} chunks",
            ids.len(),
            chunks.len()
        );

        thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .iter()
                .enumerate()
                .map(|(worker, chunk)| {
                    scope.spawn(move || {
                        let mut report = PoolReport::default();
                        for id in chunk {
                            run_task(worker, id, task, &mut report);
                        }
                        report
                    })
                })
                .collect();
            join_all(handles)
        })
    }
}

/// Download phase: drop incomplete folders, then fetch every identifier in
/// the job list.
pub fn run_download_phase(config: &RuntimeConfig, dispatch: Dispatch) -> Result<PoolReport> {
    let source = YtDlpSource::new(&config.yt_dlp);
    source.ensure_available()?;
    let fetcher = VideoFetcher::from_config(source, config);
    fetcher.assembler().ensure_available()?;

    let store = fetcher.store();
    store.prepare()?;
    store.clean()?;

    let ids = read_job_list(&config.job_list)?;
    if ids.is_empty() {
        warn!("{} lists no videos", config.job_list.display());
        return Ok(PoolReport::default());
    }

    let report = WorkerPool::new(config.workers)
        .with_dispatch(dispatch)
        .run(&ids, |id| fetcher.process(id));
    info!(
        "downloads finished: {} new, {} already present, {} collisions, {} unavailable, {} failed, {} discarded, {} panicked",
        report.downloaded,
        report.already_present,
        report.collisions,
        report.unavailable,
        report.failed,
        report.discarded,
        report.panicked
    );
    Ok(report)
}

fn run_task<F>(worker: usize, id: &str, task: &F, report: &mut PoolReport)
where
    F: Fn(&str) -> FetchOutcome + Sync,
{
    debug!("worker {worker} picked {id}");
    match catch_unwind(AssertUnwindSafe(|| task(id))) {
        Ok(outcome) => {
            debug!("worker {worker} finished {id}: {}", outcome.label());
            report.record(&outcome);
        }
        Err(payload) => {
            error!("worker {worker} panicked on {id}: {}", panic_message(&*payload));
            report.panicked += 1;
        }
    }
}

fn join_all(handles: Vec<thread::ScopedJoinHandle<'_, PoolReport>>) -> PoolReport {
    let mut total = PoolReport::default();
    for handle in handles {
        match handle.join() {
            Ok(report) => total.merge(report),
            Err(_) => {
                error!("a download worker died; its remaining work was lost");
                total.lost_workers += 1;
            }
        }
    }
    total
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
