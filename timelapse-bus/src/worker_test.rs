use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::error::{JobError, PipelineError};
use crate::event::{EventBus, LogLevel, PipelineEvent};
use crate::job::{SnapshotId, SnapshotJob, StageKind, WorkerStatus};
use crate::queue::JobQueue;
use crate::worker::{MAX_WORKERS, Outlet, Stage, WorkerPool};

#[derive(Default)]
struct Echo {
    fail_on: Option<u32>,
    gate: Option<Arc<Semaphore>>,
    seen: Mutex<Vec<u32>>,
}

impl Stage for Echo {
    type Output = SnapshotJob;

    fn process(&self, job: SnapshotJob) -> BoxFuture<'_, Result<Vec<SnapshotJob>, JobError>> {
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|e| JobError::Decode(e.to_string()))?;
            }
            self.seen.lock().unwrap().push(job.id.commit_id);
            if self.fail_on == Some(job.id.commit_id) {
                return Err(JobError::Decode("bad board".to_string()));
            }
            Ok(vec![job])
        })
    }
}

fn job(commit_id: u32) -> SnapshotJob {
    SnapshotJob::pending(SnapshotId::new(commit_id, format!("hash{commit_id}"), 0))
}

fn start_pool(
    stage: Arc<Echo>,
    size: usize,
    events: &EventBus,
) -> (WorkerPool, Arc<JobQueue<SnapshotJob>>) {
    let stage: Arc<dyn Stage<Output = SnapshotJob>> = stage;
    let inbound = Arc::new(JobQueue::new(16));
    let downstream = Arc::new(JobQueue::new(16));
    let pool = WorkerPool::start(
        StageKind::Render,
        stage,
        inbound,
        Outlet::Queue(downstream.clone()),
        size,
        events.clone(),
    );
    (pool, downstream)
}

async fn submit(pool: &WorkerPool, commit_id: u32) -> anyhow::Result<()> {
    pool.inbound()
        .enqueue(job(commit_id))
        .await
        .map_err(|_| anyhow::anyhow!("inbound closed"))
}

fn drain_ids(queue: &JobQueue<SnapshotJob>) -> Vec<u32> {
    let mut ids = Vec::new();
    while let Some(job) = queue.try_dequeue() {
        ids.push(job.id.commit_id);
    }
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_resize_clamps_at_zero_and_max() -> anyhow::Result<()> {
    let events = EventBus::default();
    let (pool, _) = start_pool(Arc::new(Echo::default()), 2, &events);
    assert_eq!(pool.size(), 2);

    assert_eq!(pool.resize(3).await?, 5);
    assert_eq!(pool.resize(-1).await?, 4);
    assert_eq!(pool.workers().len(), 4);
    assert_eq!(
        pool.workers().iter().map(|w| w.id).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert_eq!(pool.resize(-100).await?, 0);
    assert_eq!(pool.resize(i64::from(i32::MAX)).await?, MAX_WORKERS);

    pool.stop().await?;
    assert_eq!(pool.size(), 0);
    Ok(())
}

#[tokio::test]
async fn test_shrink_lets_in_flight_job_finish() -> anyhow::Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let stage = Arc::new(Echo {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let events = EventBus::default();
    let (pool, downstream) = start_pool(stage, 1, &events);

    submit(&pool, 7).await?;
    for _ in 0..100 {
        if pool.workers().iter().any(|w| w.status == WorkerStatus::Active) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.workers()[0].status, WorkerStatus::Active);

    assert_eq!(pool.resize(-1).await?, 0);
    gate.add_permits(1);
    pool.stop().await?;

    assert_eq!(drain_ids(&downstream), vec![7]);
    Ok(())
}

#[tokio::test]
async fn test_failed_job_is_logged_and_dropped() -> anyhow::Result<()> {
    let stage = Arc::new(Echo {
        fail_on: Some(1),
        ..Default::default()
    });
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let (pool, downstream) = start_pool(stage.clone(), 2, &events);

    for i in 0..3 {
        submit(&pool, i).await?;
    }
    pool.stop().await?;

    assert_eq!(drain_ids(&downstream), vec![0, 2]);
    assert_eq!(stage.seen.lock().unwrap().len(), 3);

    let mut warnings = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::Log {
            level: LogLevel::Warning,
            message,
            ..
        } = event
        {
            warnings.push(message);
        }
    }
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("#1 hash1"), "{}", warnings[0]);
    Ok(())
}

#[tokio::test]
async fn test_stop_without_workers_reports_queued_jobs() -> anyhow::Result<()> {
    let events = EventBus::default();
    let mut rx = events.subscribe();
    let (pool, downstream) = start_pool(Arc::new(Echo::default()), 0, &events);

    submit(&pool, 1).await?;
    submit(&pool, 2).await?;
    pool.stop().await?;

    assert!(pool.inbound().is_empty());
    assert!(drain_ids(&downstream).is_empty());
    let mut dropped = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, PipelineEvent::Log { level: LogLevel::Warning, .. }) {
            dropped += 1;
        }
    }
    assert_eq!(dropped, 2);
    Ok(())
}

#[tokio::test]
async fn test_closed_downstream_fails_the_pool() -> anyhow::Result<()> {
    let events = EventBus::default();
    let (pool, downstream) = start_pool(Arc::new(Echo::default()), 1, &events);
    downstream.close();

    submit(&pool, 1).await?;
    let err = pool.stop().await.expect_err("downstream was closed");
    assert!(matches!(err, PipelineError::DownstreamClosed(StageKind::Render)));
    Ok(())
}

#[tokio::test]
async fn test_sink_outlet_receives_outputs() -> anyhow::Result<()> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink: Outlet<SnapshotJob> = {
        let collected = collected.clone();
        Outlet::Sink(Arc::new(move |job: SnapshotJob| {
            collected.lock().unwrap().push(job.id.commit_id)
        }))
    };
    let stage: Arc<dyn Stage<Output = SnapshotJob>> = Arc::new(Echo::default());
    let pool = WorkerPool::start(
        StageKind::Save,
        stage,
        Arc::new(JobQueue::new(4)),
        sink,
        3,
        EventBus::default(),
    );
    for i in 0..10 {
        submit(&pool, i).await?;
    }
    pool.stop().await?;

    let mut ids = collected.lock().unwrap().clone();
    ids.sort_unstable();
    assert_eq!(ids, (0..10).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn test_drained_waits_for_queued_and_in_flight_jobs() -> anyhow::Result<()> {
    let gate = Arc::new(Semaphore::new(0));
    let stage = Arc::new(Echo {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let events = EventBus::default();
    let (pool, downstream) = start_pool(stage, 1, &events);

    submit(&pool, 1).await?;
    submit(&pool, 2).await?;
    pool.inbound().close();
    for _ in 0..100 {
        if pool.workers().iter().any(|w| w.status == WorkerStatus::Active) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // the retired worker still holds job 1
    assert_eq!(pool.resize(-1).await?, 0);
    assert!(tokio::time::timeout(Duration::from_millis(50), pool.drained()).await.is_err());

    gate.add_permits(1);
    for _ in 0..100 {
        if downstream.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(drain_ids(&downstream), vec![1]);
    // job 2 is stranded until the pool grows again
    assert!(tokio::time::timeout(Duration::from_millis(50), pool.drained()).await.is_err());

    assert_eq!(pool.resize(1).await?, 1);
    tokio::time::timeout(Duration::from_secs(5), pool.drained()).await?;
    assert_eq!(drain_ids(&downstream), vec![2]);
    pool.stop().await?;
    Ok(())
}
