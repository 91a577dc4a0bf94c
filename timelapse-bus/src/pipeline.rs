use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::event::{EventBus, PipelineEvent, StageWorkers};
use crate::job::{SaveRecord, SnapshotId, SnapshotJob, StageKind};
use crate::queue::JobQueue;
use crate::stage::{FetchOptions, FetchStage, PersistStage, RenderStage, SaveLayout};
use crate::stats::StatsAggregator;
use crate::worker::{Outlet, Stage, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSizes {
    pub download: usize,
    pub render: usize,
    pub save: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            download: 4,
            render: 2,
            save: 1,
        }
    }
}

/// Drops every n-th snapshot (1-based) before it reaches the fetch queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipFilter {
    every: Option<NonZeroUsize>,
}

impl SkipFilter {
    pub fn every(n: usize) -> Self {
        Self {
            every: NonZeroUsize::new(n),
        }
    }

    pub fn keep(&self, position: usize) -> bool {
        match self.every {
            Some(n) => position % n.get() != 0,
            None => true,
        }
    }
}

/// The processing step of each pool. Tests swap in their own stages.
pub struct StageSet {
    pub fetch: Arc<dyn Stage<Output = SnapshotJob>>,
    pub render: Arc<dyn Stage<Output = SnapshotJob>>,
    pub persist: Arc<dyn Stage<Output = SaveRecord>>,
}

impl StageSet {
    /// HTTP fetch, PNG render and filesystem persist.
    pub fn remote(options: FetchOptions, layout: SaveLayout, events: EventBus) -> Self {
        Self {
            fetch: Arc::new(FetchStage::new(options, layout, events)),
            render: Arc::new(RenderStage::default()),
            persist: Arc::new(PersistStage),
        }
    }
}

pub struct RunConfig {
    pub snapshots: Vec<SnapshotId>,
    pub sizes: PoolSizes,
    pub queue_capacity: usize,
    pub stats_interval: Duration,
    pub skip: SkipFilter,
    pub stages: StageSet,
    /// Created before any worker starts, failure aborts the start.
    pub prepare_dirs: Vec<PathBuf>,
}

impl RunConfig {
    pub fn new(snapshots: Vec<SnapshotId>, stages: StageSet) -> Self {
        Self {
            snapshots,
            sizes: PoolSizes::default(),
            queue_capacity: 256,
            stats_interval: Duration::from_secs(1),
            skip: SkipFilter::default(),
            stages,
            prepare_dirs: Vec::new(),
        }
    }
}

struct Pools {
    download: WorkerPool,
    render: WorkerPool,
    save: WorkerPool,
}

impl Pools {
    fn get(&self, kind: StageKind) -> &WorkerPool {
        match kind {
            StageKind::Download => &self.download,
            StageKind::Render => &self.render,
            StageKind::Save => &self.save,
        }
    }

    fn status(&self) -> Vec<StageWorkers> {
        StageKind::ALL
            .iter()
            .map(|&stage| StageWorkers {
                stage,
                workers: self.get(stage).workers(),
            })
            .collect()
    }

    fn counts(&self) -> BTreeMap<StageKind, usize> {
        StageKind::ALL
            .iter()
            .map(|&stage| (stage, self.get(stage).size()))
            .collect()
    }
}

struct ActiveRun {
    pools: Arc<Pools>,
    stop: CancellationToken,
}

struct Inner {
    events: EventBus,
    state: watch::Sender<PipelineState>,
    run: tokio::sync::Mutex<Option<ActiveRun>>,
    latest_stats: Mutex<Option<Arc<StatsAggregator>>>,
}

/// Owns the lifecycle of a run: `Idle -> Running -> Stopping -> Idle`.
///
/// A run stays `Running`, and its pools resizable, until every snapshot went
/// through all three stages or [`Orchestrator::stop`] is called. Either way
/// the pools are stopped in order so nothing already fetched is lost.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

impl Orchestrator {
    pub fn new(events: EventBus) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            inner: Arc::new(Inner {
                events,
                state,
                run: tokio::sync::Mutex::new(None),
                latest_stats: Mutex::new(None),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn state(&self) -> PipelineState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.inner.state.subscribe()
    }

    /// Stats of the current run, or of the last one once idle.
    pub fn stats(&self) -> Option<Arc<StatsAggregator>> {
        self.inner
            .latest_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn start(&self, config: RunConfig) -> Result<(), PipelineError> {
        let mut run = self.inner.run.lock().await;
        if self.state() != PipelineState::Idle {
            return Err(PipelineError::AlreadyRunning);
        }

        for dir in &config.prepare_dirs {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| PipelineError::Prepare {
                    path: dir.clone(),
                    source,
                })?;
        }

        let events = self.inner.events.clone();
        let stats = Arc::new(StatsAggregator::new(config.stats_interval));
        let capacity = config.queue_capacity;
        let fetch_queue = Arc::new(JobQueue::new(capacity));
        let render_queue = Arc::new(JobQueue::new(capacity));
        let save_queue = Arc::new(JobQueue::new(capacity));
        let sink: Outlet<SaveRecord> = {
            let stats = stats.clone();
            Outlet::Sink(Arc::new(move |record: SaveRecord| stats.record(record)))
        };

        let sizes = config.sizes;
        let pools = Arc::new(Pools {
            download: WorkerPool::start(
                StageKind::Download,
                config.stages.fetch,
                fetch_queue.clone(),
                Outlet::Queue(render_queue.clone()),
                sizes.download,
                events.clone(),
            ),
            render: WorkerPool::start(
                StageKind::Render,
                config.stages.render,
                render_queue,
                Outlet::Queue(save_queue.clone()),
                sizes.render,
                events.clone(),
            ),
            save: WorkerPool::start(
                StageKind::Save,
                config.stages.persist,
                save_queue,
                sink,
                sizes.save,
                events.clone(),
            ),
        });

        let stop = CancellationToken::new();
        let total = config.snapshots.len();
        let feeder = tokio::spawn(feed(
            config.snapshots,
            config.skip,
            fetch_queue,
            stop.clone(),
        ));
        let ticker_cancel = CancellationToken::new();
        let ticker = tokio::spawn(stats_loop(
            stats.clone(),
            pools.clone(),
            events.clone(),
            ticker_cancel.clone(),
        ));

        *self
            .inner
            .latest_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
        let stop_requested = stop.clone();
        *run = Some(ActiveRun {
            pools: pools.clone(),
            stop,
        });
        self.set_state(PipelineState::Running);
        events.info(format!(
            "Pipeline started with {} snapshots ({} download, {} render, {} save workers)",
            total,
            pools.download.size(),
            pools.render.size(),
            pools.save.size()
        ));
        events.emit(PipelineEvent::Workers(pools.status()));

        tokio::spawn(run_to_completion(
            self.clone(),
            feeder,
            pools,
            stats,
            stop_requested,
            ticker,
            ticker_cancel,
        ));
        Ok(())
    }

    /// Stops feeding new snapshots and waits until the pipeline is idle again.
    /// Jobs already queued or in flight are still carried to the end.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        {
            let run = self.inner.run.lock().await;
            match (self.state(), run.as_ref()) {
                (PipelineState::Running, Some(active)) => {
                    active.stop.cancel();
                    self.set_state(PipelineState::Stopping);
                    self.inner.events.info("Stop requested, draining pipeline");
                }
                (PipelineState::Stopping, _) => {}
                _ => return Err(PipelineError::NotRunning),
            }
        }
        self.wait_idle().await;
        Ok(())
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == PipelineState::Idle).await;
    }

    pub async fn add_worker(&self, stage_id: u8, count: u32) -> Result<usize, PipelineError> {
        self.resize(stage_id, i64::from(count)).await
    }

    /// Removing more workers than exist leaves the pool empty.
    pub async fn remove_worker(&self, stage_id: u8, count: u32) -> Result<usize, PipelineError> {
        self.resize(stage_id, -i64::from(count)).await
    }

    /// Resizes one pool by `delta` and returns its new size.
    pub async fn resize(&self, stage_id: u8, delta: i64) -> Result<usize, PipelineError> {
        let kind = StageKind::try_from(stage_id)?;
        let run = self.inner.run.lock().await;
        let pools = match (self.state(), run.as_ref()) {
            (PipelineState::Running, Some(run)) => run.pools.clone(),
            _ => return Err(PipelineError::NotRunning),
        };
        let size = pools.get(kind).resize(delta).await?;
        drop(run);

        self.inner
            .events
            .info(format!("[{} pool] resized by {} to {} workers", kind, delta, size));
        self.inner
            .events
            .emit(PipelineEvent::Workers(pools.status()));
        Ok(size)
    }

    pub async fn worker_status(&self) -> Option<Vec<StageWorkers>> {
        let run = self.inner.run.lock().await;
        run.as_ref().map(|run| run.pools.status())
    }

    fn set_state(&self, state: PipelineState) {
        self.inner.state.send_replace(state);
        self.inner.events.emit(PipelineEvent::State(state));
    }
}

async fn feed(
    snapshots: Vec<SnapshotId>,
    skip: SkipFilter,
    queue: Arc<JobQueue<SnapshotJob>>,
    stop: CancellationToken,
) {
    for (i, id) in snapshots.into_iter().enumerate() {
        if !skip.keep(i + 1) {
            log::debug!("[feeder] skipping {}", id);
            continue;
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            result = queue.enqueue(SnapshotJob::pending(id)) => {
                if result.is_err() {
                    break;
                }
            }
        }
    }
    log::debug!("[feeder] done");
}

async fn stats_loop(
    stats: Arc<StatsAggregator>,
    pools: Arc<Pools>,
    events: EventBus,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(stats.interval().max(Duration::from_millis(10)));
    // first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => publish_tick(&stats, &pools, &events),
        }
    }
}

fn publish_tick(stats: &StatsAggregator, pools: &Pools, events: &EventBus) {
    events.emit(PipelineEvent::Saves(stats.tick(pools.counts())));
    events.emit(PipelineEvent::Workers(pools.status()));
}

/// Closes each stage's input once everything upstream of it has finished.
/// Pools stay resizable the whole time.
async fn drain_in_order(pools: &Pools) {
    for kind in StageKind::ALL {
        let pool = pools.get(kind);
        pool.inbound().close();
        pool.drained().await;
        log::debug!("[{} pool] drained", kind);
    }
}

async fn run_to_completion(
    orchestrator: Orchestrator,
    feeder: JoinHandle<()>,
    pools: Arc<Pools>,
    stats: Arc<StatsAggregator>,
    stop_requested: CancellationToken,
    ticker: JoinHandle<()>,
    ticker_cancel: CancellationToken,
) {
    let events = orchestrator.inner.events.clone();
    if let Err(e) = feeder.await {
        events.error(format!("[feeder] {}", e));
    }
    tokio::select! {
        _ = drain_in_order(&pools) => {}
        _ = stop_requested.cancelled() => {}
    }
    {
        // waits out a resize that is already in progress
        let _run = orchestrator.inner.run.lock().await;
        if orchestrator.state() == PipelineState::Running {
            orchestrator.set_state(PipelineState::Stopping);
        }
    }

    for kind in StageKind::ALL {
        let pool = pools.get(kind);
        // upstream is stopped, so a pool shrunk to zero would strand what is left
        if pool.size() == 0 && !pool.inbound().is_empty() {
            match pool.resize(1).await {
                Ok(_) => events.warn(format!("[{} pool] empty while draining, added a worker", kind)),
                Err(e) => events.error(format!("[{} pool] {}", kind, e)),
            }
        }
        if let Err(e) = pool.stop().await {
            events.error(format!("[{} pool] stopped with error: {}", kind, e));
        }
    }

    ticker_cancel.cancel();
    let _ = ticker.await;
    publish_tick(&stats, &pools, &events);

    orchestrator.inner.run.lock().await.take();
    events.info(format!(
        "Pipeline finished, {} files saved",
        stats.completed_count()
    ));
    orchestrator.set_state(PipelineState::Idle);
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
