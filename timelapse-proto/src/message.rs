/// Leading byte of every frame.
pub mod opcode {
    pub const LOG_MESSAGE: u8 = 0;
    pub const WORKER_STATUS: u8 = 1;
    pub const SAVE_STATUS: u8 = 2;

    pub const START: u8 = 16;
    pub const STOP: u8 = 17;
    pub const ADD_WORKER: u8 = 18;
    pub const REMOVE_WORKER: u8 = 19;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl TryFrom<u8> for LogLevel {
    type Error = u8;

    // `Self::Error` would be ambiguous with the `Error` variant.
    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(LogLevel::Info),
            1 => Ok(LogLevel::Warning),
            2 => Ok(LogLevel::Error),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Waiting = 0,
    Active = 1,
}

impl TryFrom<u8> for WorkerState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WorkerState::Waiting),
            1 => Ok(WorkerState::Active),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEntry {
    pub worker_id: u8,
    pub status: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWorkers {
    pub stage_id: u8,
    pub workers: Vec<WorkerEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveEntry {
    pub commit_id: u32,
    pub commit_hash: String,
    pub date_millis: u64,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveGroup {
    pub save_type: u8,
    pub records: Vec<SaveEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartCommand {
    pub repo_url: String,
    pub download_base_url: String,
    pub game_server_base_url: String,
    pub commit_hashes_file_name: String,
    pub max_top_placers: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    LogMessage {
        level: LogLevel,
        unix_seconds: u64,
        message: String,
    },
    WorkerStatus {
        stages: Vec<StageWorkers>,
    },
    SaveStatus {
        completed_count: u32,
        per_second: f32,
        groups: Vec<SaveGroup>,
    },
    Start(StartCommand),
    Stop,
    AddWorker {
        stage_id: u8,
        change_by: i32,
    },
    RemoveWorker {
        stage_id: u8,
        change_by: i32,
    },
}

impl Message {
    pub fn opcode(&self) -> u8 {
        match self {
            Message::LogMessage { .. } => opcode::LOG_MESSAGE,
            Message::WorkerStatus { .. } => opcode::WORKER_STATUS,
            Message::SaveStatus { .. } => opcode::SAVE_STATUS,
            Message::Start(_) => opcode::START,
            Message::Stop => opcode::STOP,
            Message::AddWorker { .. } => opcode::ADD_WORKER,
            Message::RemoveWorker { .. } => opcode::REMOVE_WORKER,
        }
    }

    /// Control messages travel from an observer to the generator.
    pub fn is_control(&self) -> bool {
        self.opcode() >= opcode::START
    }
}
