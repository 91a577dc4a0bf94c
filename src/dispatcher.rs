use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use timelapse_bus::stage::{FetchOptions, SaveLayout};
use timelapse_bus::{
    EventBus, LogLevel, Orchestrator, PipelineEvent, PipelineState, RunConfig, SaveStatus,
    StageSet, StageWorkers, WorkerStatus,
};
use timelapse_proto::{Message, SaveEntry, SaveGroup, StartCommand, WorkerEntry, WorkerState};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commits;
use crate::config::GeneratorConfig;

/// Frames buffered per observer before it counts as a failed write.
pub const OUTBOX_CAPACITY: usize = 256;

pub type ObserverId = u64;

/// Fans pipeline events out to observers and applies their control commands.
pub struct Dispatcher {
    orchestrator: Orchestrator,
    config: GeneratorConfig,
    observers: RwLock<HashMap<ObserverId, mpsc::Sender<Bytes>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(orchestrator: Orchestrator, config: GeneratorConfig) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            config,
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn events(&self) -> &EventBus {
        self.orchestrator.events()
    }

    pub fn connect(&self) -> (ObserverId, mpsc::Receiver<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        log::info!("[observer {}] connected, {} observers", id, self.observer_count());
        (id, rx)
    }

    pub fn disconnect(&self, id: ObserverId) {
        if self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
        {
            log::info!("[observer {}] disconnected", id);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Encodes once and writes to every observer. An observer whose outbox is
    /// full or closed is dropped, the others are unaffected.
    pub fn broadcast(&self, message: &Message) {
        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("cannot encode {:?}: {}", message.opcode(), e);
                return;
            }
        };

        let failed = {
            let observers = self.observers.read().unwrap_or_else(PoisonError::into_inner);
            observers
                .iter()
                .filter(|(_, tx)| tx.try_send(frame.clone()).is_err())
                .map(|(id, _)| *id)
                .collect::<Vec<_>>()
        };
        if failed.is_empty() {
            return;
        }
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        for id in failed {
            observers.remove(&id);
            log::warn!("[observer {}] write failed, dropping observer", id);
        }
    }

    /// Forwards pipeline events to observers until cancelled. Events emitted
    /// after this returns are never missed.
    pub fn start_event_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let rx = self.events().subscribe();
        tokio::spawn(self.clone().event_loop(rx, cancel))
    }

    async fn event_loop(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<PipelineEvent>,
        cancel: CancellationToken,
    ) {
        // save-log position of the current run already sent to observers
        let mut forwarded = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(PipelineEvent::Saves(status)) => {
                        let status = unseen(status, &mut forwarded);
                        self.broadcast(&save_status(&status));
                    }
                    Ok(event) => {
                        if matches!(event, PipelineEvent::State(PipelineState::Running)) {
                            forwarded = 0;
                        }
                        if let Some(message) = to_message(&event) {
                            self.broadcast(&message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("event loop lagged, {} events skipped", n);
                        self.replay_saves(&mut forwarded);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Re-sends save records that went out in ticks the event loop missed.
    fn replay_saves(&self, forwarded: &mut usize) {
        let Some(stats) = self.orchestrator.stats() else {
            return;
        };
        let replay = stats.replay_from(*forwarded);
        if replay.new_records.is_empty() {
            return;
        }
        log::info!("replaying {} save records", replay.new_records.len());
        *forwarded = replay.first_index + replay.new_records.len();
        self.broadcast(&save_status(&replay));
    }

    /// Decodes and applies one frame from an observer. Never fails: bad frames
    /// are logged and discarded, rejected commands are reported as warnings.
    pub async fn handle_inbound(&self, observer: ObserverId, frame: &[u8]) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[observer {}] discarded frame: {}", observer, e);
                return;
            }
        };
        if !message.is_control() {
            log::warn!(
                "[observer {}] discarded event opcode {} sent as a command",
                observer,
                message.opcode()
            );
            return;
        }

        if let Err(e) = self.apply(message).await {
            self.events()
                .warn(format!("[observer {}] command rejected: {:#}", observer, e));
        }
    }

    async fn apply(&self, message: Message) -> anyhow::Result<()> {
        match message {
            Message::Start(start) => self.start_run(start).await,
            Message::Stop => Ok(self.orchestrator.stop().await?),
            Message::AddWorker {
                stage_id,
                change_by,
            } => {
                self.orchestrator
                    .resize(stage_id, i64::from(change_by))
                    .await?;
                Ok(())
            }
            Message::RemoveWorker {
                stage_id,
                change_by,
            } => {
                self.orchestrator
                    .resize(stage_id, -i64::from(change_by))
                    .await?;
                Ok(())
            }
            other => anyhow::bail!("opcode {} is not a command", other.opcode()),
        }
    }

    async fn start_run(&self, start: StartCommand) -> anyhow::Result<()> {
        let path = commits::resolve_commit_list(
            self.config.commit_list_dir(),
            &start.commit_hashes_file_name,
        )?;
        if !start.repo_url.is_empty() {
            self.events().warn(format!(
                "repoUrl {} is not cloned, using commit list {}",
                start.repo_url, start.commit_hashes_file_name
            ));
        }
        let snapshots = commits::load_commit_log(&path, self.config.authors()).await?;

        let layout = SaveLayout::new(self.config.output_dir(), self.config.canvas());
        let options = FetchOptions {
            download_base_url: start.download_base_url,
            game_server_base_url: start.game_server_base_url,
            max_top_placers: start.max_top_placers,
            keep_downloads: self.config.keep_downloads(),
            render_dates: self.config.render_dates(),
        };

        let mut run = RunConfig::new(
            snapshots,
            StageSet::remote(options, layout.clone(), self.events().clone()),
        );
        run.sizes = self.config.pool_sizes();
        run.queue_capacity = self.config.queue_capacity();
        run.stats_interval = self.config.stats_interval();
        run.skip = self.config.skip();
        run.prepare_dirs = layout.directories();
        self.orchestrator.start(run).await?;
        Ok(())
    }
}

/// Drops the records of `status` that a replay already delivered.
fn unseen(mut status: SaveStatus, forwarded: &mut usize) -> SaveStatus {
    let skip = forwarded
        .saturating_sub(status.first_index)
        .min(status.new_records.len());
    status.new_records.drain(..skip);
    status.first_index += skip;
    *forwarded = (*forwarded).max(status.first_index + status.new_records.len());
    status
}

fn log_level(level: LogLevel) -> timelapse_proto::LogLevel {
    match level {
        LogLevel::Info => timelapse_proto::LogLevel::Info,
        LogLevel::Warning => timelapse_proto::LogLevel::Warning,
        LogLevel::Error => timelapse_proto::LogLevel::Error,
    }
}

fn worker_status(stages: &[StageWorkers]) -> Message {
    Message::WorkerStatus {
        stages: stages
            .iter()
            .map(|stage| timelapse_proto::StageWorkers {
                stage_id: stage.stage.id(),
                workers: stage
                    .workers
                    .iter()
                    .map(|w| WorkerEntry {
                        worker_id: u8::try_from(w.id).unwrap_or(u8::MAX),
                        status: match w.status {
                            WorkerStatus::Waiting => WorkerState::Waiting,
                            WorkerStatus::Active => WorkerState::Active,
                        },
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn save_status(status: &SaveStatus) -> Message {
    let mut groups: BTreeMap<u8, Vec<SaveEntry>> = BTreeMap::new();
    for record in &status.new_records {
        groups
            .entry(record.save_type.id())
            .or_default()
            .push(SaveEntry {
                commit_id: record.commit_id,
                commit_hash: record.commit_hash.clone(),
                date_millis: record.date_millis(),
                path: record.path.display().to_string(),
            });
    }
    Message::SaveStatus {
        completed_count: u32::try_from(status.stats.completed_count).unwrap_or(u32::MAX),
        per_second: status.stats.per_second,
        groups: groups
            .into_iter()
            .map(|(save_type, records)| SaveGroup { save_type, records })
            .collect(),
    }
}

/// Wire form of a pipeline event. State changes are only visible through logs.
pub fn to_message(event: &PipelineEvent) -> Option<Message> {
    match event {
        PipelineEvent::Log {
            level,
            time,
            message,
        } => Some(Message::LogMessage {
            level: log_level(*level),
            unix_seconds: u64::try_from(*time).unwrap_or(0),
            message: message.clone(),
        }),
        PipelineEvent::Workers(stages) => Some(worker_status(stages)),
        PipelineEvent::Saves(status) => Some(save_status(status)),
        PipelineEvent::State(_) => None,
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
