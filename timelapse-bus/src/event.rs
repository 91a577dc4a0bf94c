use tokio::sync::broadcast;

use crate::job::StageKind;
use crate::pipeline::PipelineState;
use crate::stats::SaveStatus;
use crate::worker::WorkerView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWorkers {
    pub stage: StageKind,
    pub workers: Vec<WorkerView>,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Log {
        level: LogLevel,
        /// Unix seconds.
        time: i64,
        message: String,
    },
    Workers(Vec<StageWorkers>),
    Saves(SaveStatus),
    State(PipelineState),
}

/// Fan-out of pipeline events. Every line logged here also goes to `log`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => log::info!("{}", message),
            LogLevel::Warning => log::warn!("{}", message),
            LogLevel::Error => log::error!("{}", message),
        }
        self.emit(PipelineEvent::Log {
            level,
            time: chrono::Utc::now().timestamp(),
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, message)
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message)
    }
}
