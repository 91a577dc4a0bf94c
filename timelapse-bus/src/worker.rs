use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{JobError, PipelineError};
use crate::event::EventBus;
use crate::job::{SnapshotJob, StageKind, WorkerStatus};
use crate::queue::JobQueue;

/// Hard cap on workers per pool.
pub const MAX_WORKERS: usize = 100;

const WAITING: u8 = 0;
const ACTIVE: u8 = 1;

/// Stage-specific processing step run by every worker of a pool.
///
/// One input job may fan out into several outputs, e.g. a fetched snapshot
/// becomes a canvas frame, a date frame and a placers frame.
pub trait Stage: Send + Sync + 'static {
    type Output: Send + 'static;

    fn process(&self, job: SnapshotJob) -> BoxFuture<'_, Result<Vec<Self::Output>, JobError>>;
}

/// Where a pool hands its results: the next stage's queue or a terminal sink.
pub enum Outlet<T> {
    Queue(Arc<JobQueue<T>>),
    Sink(Arc<dyn Fn(T) + Send + Sync>),
}

impl<T> Clone for Outlet<T> {
    fn clone(&self) -> Self {
        match self {
            Outlet::Queue(q) => Outlet::Queue(q.clone()),
            Outlet::Sink(f) => Outlet::Sink(f.clone()),
        }
    }
}

impl<T> Outlet<T> {
    async fn send(&self, item: T) -> Result<(), T> {
        match self {
            Outlet::Queue(q) => q.enqueue(item).await.map_err(|closed| closed.0),
            Outlet::Sink(f) => {
                f(item);
                Ok(())
            }
        }
    }

    fn close(&self) {
        if let Outlet::Queue(q) = self {
            q.close();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerView {
    pub id: usize,
    pub status: WorkerStatus,
}

type WorkerTable = Arc<RwLock<Vec<(usize, Arc<AtomicU8>)>>>;

/// Number of worker tasks still alive, retired ones included.
type LiveCount = Arc<watch::Sender<usize>>;

struct LiveGuard(LiveCount);

impl LiveGuard {
    fn new(live: LiveCount) -> Self {
        live.send_modify(|n| *n += 1);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

enum PoolCommand {
    Resize {
        delta: i64,
        result: oneshot::Sender<usize>,
    },
    Stop {
        result: oneshot::Sender<Result<(), PipelineError>>,
    },
}

/// Handle to a running pool. Worker lifecycles are owned by a supervisor
/// task that serializes resize and stop requests.
pub struct WorkerPool {
    kind: StageKind,
    inbound: Arc<JobQueue<SnapshotJob>>,
    tx: mpsc::Sender<PoolCommand>,
    table: WorkerTable,
    live: LiveCount,
}

impl WorkerPool {
    /// Spawns the supervisor and `size` workers. Must be called inside a runtime.
    pub fn start<O: Send + 'static>(
        kind: StageKind,
        stage: Arc<dyn Stage<Output = O>>,
        inbound: Arc<JobQueue<SnapshotJob>>,
        outlet: Outlet<O>,
        size: usize,
        events: EventBus,
    ) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let table: WorkerTable = Arc::default();
        let live: LiveCount = Arc::new(watch::channel(0).0);
        let mut state = PoolState {
            kind,
            stage,
            inbound: inbound.clone(),
            outlet,
            events,
            workers: Vec::new(),
            retired: Vec::new(),
            table: table.clone(),
            live: live.clone(),
        };
        state.resize(size.min(MAX_WORKERS) as i64);
        tokio::spawn(Self::inner_loop(state, rx));

        Self {
            kind,
            inbound,
            tx,
            table,
            live,
        }
    }

    async fn inner_loop<O: Send + 'static>(
        mut state: PoolState<O>,
        mut rx: mpsc::Receiver<PoolCommand>,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                PoolCommand::Resize { delta, result } => {
                    let _ = result.send(state.resize(delta));
                }
                PoolCommand::Stop { result } => {
                    let _ = result.send(state.shutdown().await);
                    return;
                }
            }
        }
        // every handle dropped without a stop
        for worker in &state.workers {
            worker.cancel.cancel();
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn inbound(&self) -> &Arc<JobQueue<SnapshotJob>> {
        &self.inbound
    }

    /// Grows or shrinks the pool by `delta`, returning the new size.
    /// Growth is clamped at [`MAX_WORKERS`], shrinking at zero.
    pub async fn resize(&self, delta: i64) -> Result<usize, PipelineError> {
        let (result, rx) = oneshot::channel();
        self.tx
            .send(PoolCommand::Resize { delta, result })
            .await
            .map_err(|_| PipelineError::PoolGone(self.kind))?;
        rx.await.map_err(|_| PipelineError::PoolGone(self.kind))
    }

    /// Closes the inbound queue and waits for every worker, retired ones included.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let (result, rx) = oneshot::channel();
        self.tx
            .send(PoolCommand::Stop { result })
            .await
            .map_err(|_| PipelineError::PoolGone(self.kind))?;
        rx.await.map_err(|_| PipelineError::PoolGone(self.kind))?
    }

    /// Resolves once the inbound queue is closed and empty and no worker is
    /// left holding a job. The pool keeps serving resizes meanwhile, and a pool
    /// shrunk to zero with jobs still queued waits until it is grown again.
    pub async fn drained(&self) {
        let mut live = self.live.subscribe();
        loop {
            let idle = *live.borrow_and_update() == 0;
            if idle && self.inbound.is_closed() && self.inbound.is_empty() {
                return;
            }
            if live.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn size(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn workers(&self) -> Vec<WorkerView> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, status)| WorkerView {
                id: *id,
                status: match status.load(Ordering::Relaxed) {
                    ACTIVE => WorkerStatus::Active,
                    _ => WorkerStatus::Waiting,
                },
            })
            .collect()
    }
}

struct WorkerSlot {
    id: usize,
    status: Arc<AtomicU8>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), PipelineError>>,
}

struct PoolState<O> {
    kind: StageKind,
    stage: Arc<dyn Stage<Output = O>>,
    inbound: Arc<JobQueue<SnapshotJob>>,
    outlet: Outlet<O>,
    events: EventBus,
    workers: Vec<WorkerSlot>,
    retired: Vec<JoinHandle<Result<(), PipelineError>>>,
    table: WorkerTable,
    live: LiveCount,
}

impl<O: Send + 'static> PoolState<O> {
    fn resize(&mut self, delta: i64) -> usize {
        if delta > 0 {
            let target = self
                .workers
                .len()
                .saturating_add(usize::try_from(delta).unwrap_or(usize::MAX))
                .min(MAX_WORKERS);
            while self.workers.len() < target {
                self.spawn_worker();
            }
        } else if delta < 0 {
            let count = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
            for _ in 0..count.min(self.workers.len()) {
                // Newest first. The worker finishes its current job before exiting.
                if let Some(worker) = self.workers.pop() {
                    worker.cancel.cancel();
                    self.retired.push(worker.handle);
                }
            }
        }
        self.publish();
        log::debug!("[{} pool] now {} workers", self.kind, self.workers.len());
        self.workers.len()
    }

    fn spawn_worker(&mut self) {
        let id = self.workers.len();
        let status = Arc::new(AtomicU8::new(WAITING));
        let cancel = CancellationToken::new();
        let live = LiveGuard::new(self.live.clone());
        let handle = tokio::spawn(run_worker(Worker {
            kind: self.kind,
            id,
            stage: self.stage.clone(),
            inbound: self.inbound.clone(),
            outlet: self.outlet.clone(),
            status: status.clone(),
            cancel: cancel.clone(),
            events: self.events.clone(),
            _live: live,
        }));
        self.workers.push(WorkerSlot {
            id,
            status,
            cancel,
            handle,
        });
    }

    fn publish(&self) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        *table = self
            .workers
            .iter()
            .map(|w| (w.id, w.status.clone()))
            .collect();
    }

    async fn shutdown(&mut self) -> Result<(), PipelineError> {
        self.inbound.close();
        if self.workers.is_empty() {
            while let Some(job) = self.inbound.try_dequeue() {
                self.events.warn(format!(
                    "[{} pool] dropped {}: no workers left to drain the queue",
                    self.kind, job
                ));
            }
        }

        let mut outcome = Ok(());
        let handles = self
            .workers
            .drain(..)
            .map(|w| w.handle)
            .chain(self.retired.drain(..))
            .collect::<Vec<_>>();
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("[{} pool] worker join error: {}", self.kind, e);
                    Err(PipelineError::WorkerPanicked(self.kind))
                }
            };
            if outcome.is_ok() {
                outcome = result;
            }
        }
        self.publish();
        if outcome.is_err() {
            // nothing downstream will ever be fed again
            self.outlet.close();
        }
        outcome
    }
}

struct Worker<O> {
    kind: StageKind,
    id: usize,
    stage: Arc<dyn Stage<Output = O>>,
    inbound: Arc<JobQueue<SnapshotJob>>,
    outlet: Outlet<O>,
    status: Arc<AtomicU8>,
    cancel: CancellationToken,
    events: EventBus,
    _live: LiveGuard,
}

async fn run_worker<O: Send + 'static>(worker: Worker<O>) -> Result<(), PipelineError> {
    log::debug!("[{} worker {}] started", worker.kind, worker.id);
    loop {
        let job = tokio::select! {
            biased;
            _ = worker.cancel.cancelled() => break,
            job = worker.inbound.dequeue() => match job {
                Some(job) => job,
                None => break,
            },
        };

        worker.status.store(ACTIVE, Ordering::Relaxed);
        let label = job.to_string();
        let result = worker.stage.process(job).await;
        let delivered = match result {
            Ok(outputs) => {
                let mut delivered = Ok(());
                for output in outputs {
                    if worker.outlet.send(output).await.is_err() {
                        delivered = Err(PipelineError::DownstreamClosed(worker.kind));
                        break;
                    }
                }
                delivered
            }
            Err(e) => {
                worker.events.warn(format!(
                    "[{} worker {}] dropped {}: {}",
                    worker.kind, worker.id, label, e
                ));
                Ok(())
            }
        };
        worker.status.store(WAITING, Ordering::Relaxed);

        if let Err(e) = delivered {
            worker.events.error(format!(
                "[{} worker {}] lost {}: {}",
                worker.kind, worker.id, label, e
            ));
            return Err(e);
        }
    }
    log::debug!("[{} worker {}] exited", worker.kind, worker.id);
    Ok(())
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;
