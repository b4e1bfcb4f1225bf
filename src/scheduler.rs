//! Scheduler: one ticker per check, a bounded job queue, and a fixed
//! worker pool that drains it. A check's ticker blocks on its own job's
//! completion before resuming, which is the whole self-serialization
//! and backpressure mechanism — no per-probe mutex is needed on top of it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ResolvedConfig;
use crate::probe::{self, Probe};
use crate::store::Store;

const QUEUE_CAPACITY: usize = 50;
const QUEUE_MONITOR_INTERVAL: Duration = Duration::from_secs(20);

struct Job {
    environment: String,
    check: String,
    probe: Arc<dyn Probe>,
    done: oneshot::Sender<()>,
}

/// Handle to a running scheduler. Dropping it without calling
/// [`SchedulerHandle::shutdown`] simply abandons the background tasks —
/// prefer an explicit graceful shutdown on a signal.
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    queue_tx: Option<mpsc::Sender<Job>>,
    ticker_handles: Vec<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
    monitor_handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop every ticker, close the job queue, and let in-flight jobs
    /// drain before the worker tasks exit.
    pub async fn shutdown(mut self) {
        info!("scheduler shutdown requested");
        self.stop.store(true, Ordering::SeqCst);

        for handle in self.ticker_handles.drain(..) {
            let _ = handle.await;
        }

        // Dropping the sender closes the queue; workers finish the jobs
        // already in flight and then observe a closed channel.
        drop(self.queue_tx.take());

        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }

        self.monitor_handle.abort();
        info!("scheduler shutdown complete");
    }
}

/// Build one probe per resolved check and spawn the ticker/worker/monitor
/// topology. Returns a handle for graceful shutdown.
pub fn spawn(config: &ResolvedConfig, store: Arc<Store>) -> Result<SchedulerHandle, crate::error::ConfigError> {
    let worker_count = config.worker.max(1);
    let (queue_tx, queue_rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
    let queue_rx = Arc::new(Mutex::new(queue_rx));
    let stop = Arc::new(AtomicBool::new(false));
    let depth = Arc::new(AtomicUsize::new(0));

    let worker_handles = (0..worker_count)
        .map(|id| spawn_worker(id, queue_rx.clone(), store.clone(), depth.clone()))
        .collect();

    let mut ticker_handles = Vec::with_capacity(config.checks.len());
    for check in &config.checks {
        let built = probe::build(&check.kind, &check.environment, &check.check, &check.name, &check.params)
            .map_err(|e| annotate_check(&check.check, e))?;
        let probe: Arc<dyn Probe> = Arc::from(built);

        ticker_handles.push(spawn_ticker(
            check.environment.clone(),
            check.check.clone(),
            check.period,
            probe,
            queue_tx.clone(),
            stop.clone(),
            depth.clone(),
        ));
    }

    let monitor_handle = spawn_queue_monitor(depth, worker_count, stop.clone());

    Ok(SchedulerHandle {
        stop,
        queue_tx: Some(queue_tx),
        ticker_handles,
        worker_handles,
        monitor_handle,
    })
}

fn annotate_check(check_id: &str, err: crate::error::ProbeBuildError) -> crate::error::ConfigError {
    use crate::error::{ConfigError, ProbeBuildError};
    match err {
        ProbeBuildError::MissingParam(param) => ConfigError::MissingParam {
            check: check_id.to_string(),
            param,
        },
        ProbeBuildError::InvalidParam { param, reason } => ConfigError::InvalidParam {
            check: check_id.to_string(),
            param,
            reason,
        },
        ProbeBuildError::MutuallyExclusive(a, b) => ConfigError::InvalidParam {
            check: check_id.to_string(),
            param: format!("{a}/{b}"),
            reason: "mutually exclusive params both set".to_string(),
        },
    }
}

fn spawn_ticker(
    environment: String,
    check: String,
    period: Duration,
    probe: Arc<dyn Probe>,
    queue_tx: mpsc::Sender<Job>,
    stop: Arc<AtomicBool>,
    depth: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let (done_tx, done_rx) = oneshot::channel();
            let job = Job {
                environment: environment.clone(),
                check: check.clone(),
                probe: probe.clone(),
                done: done_tx,
            };

            depth.fetch_add(1, Ordering::SeqCst);
            trace!(%environment, %check, "enqueueing probe job");
            if queue_tx.send(job).await.is_err() {
                break;
            }

            // Block until the job is dequeued and run: a single check
            // never runs concurrently with itself.
            let _ = done_rx.await;

            if stop.load(Ordering::SeqCst) {
                break;
            }
        }

        debug!(%environment, %check, "ticker stopped");
    })
}

fn spawn_worker(
    id: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    store: Arc<Store>,
    depth: Arc<AtomicUsize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let job = {
                let mut rx = queue_rx.lock().await;
                rx.recv().await
            };

            let Some(job) = job else {
                break;
            };
            depth.fetch_sub(1, Ordering::SeqCst);

            run_job(id, job, &store).await;
        }

        debug!(worker = id, "worker stopped");
    })
}

#[instrument(skip(job, store), fields(worker = id, environment = %job.environment, check = %job.check))]
async fn run_job(id: usize, job: Job, store: &Arc<Store>) {
    let Job { environment, check, probe, done } = job;

    let results = probe.check().await;
    let _ = done.send(());

    for result in results {
        if let Err(e) = store.insert_result(result).await {
            warn!(%environment, %check, worker = id, "failed to ingest probe result: {e}");
        }
    }
}

fn spawn_queue_monitor(depth: Arc<AtomicUsize>, worker_count: usize, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(QUEUE_MONITOR_INTERVAL);
        loop {
            interval.tick().await;
            if stop.load(Ordering::SeqCst) {
                break;
            }
            let current = depth.load(Ordering::SeqCst);
            if current > worker_count {
                warn!(depth = current, workers = worker_count, "job queue depth exceeds worker pool size");
            }
        }
    })
}
