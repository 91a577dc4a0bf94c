use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::DateTime;

use crate::error::PipelineError;
use crate::palette::Palette;
use crate::placers::Placer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StageKind {
    Download = 0,
    Render = 1,
    Save = 2,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Download, StageKind::Render, StageKind::Save];

    pub fn id(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for StageKind {
    type Error = PipelineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StageKind::Download),
            1 => Ok(StageKind::Render),
            2 => Ok(StageKind::Save),
            other => Err(PipelineError::InvalidStage(other)),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Download => "download",
            StageKind::Render => "render",
            StageKind::Save => "save",
        })
    }
}

/// Kind of artifact a persisted job produced. The discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SaveType {
    CanvasDownload = 1,
    CanvasRender = 2,
    DateRender = 3,
    PlacersDownload = 4,
    TopPlacersRender = 5,
    CanvasControlRender = 6,
}

impl SaveType {
    pub const ALL: [SaveType; 6] = [
        SaveType::CanvasDownload,
        SaveType::CanvasRender,
        SaveType::DateRender,
        SaveType::PlacersDownload,
        SaveType::TopPlacersRender,
        SaveType::CanvasControlRender,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Sub directory under the canvas directory.
    pub fn dir_name(self) -> &'static str {
        match self {
            SaveType::CanvasDownload => "downloads",
            SaveType::CanvasRender => "backups",
            SaveType::DateRender => "dates",
            SaveType::PlacersDownload => "placers",
            SaveType::TopPlacersRender => "top_placers",
            SaveType::CanvasControlRender => "canvas_controls",
        }
    }

    /// Raw downloads are saved as-is, everything else is a PNG.
    pub fn file_suffix(self) -> &'static str {
        match self {
            SaveType::CanvasDownload | SaveType::PlacersDownload => "",
            _ => ".png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Waiting,
    Active,
}

/// Identity of one source snapshot, preserved end to end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId {
    /// Position in the oldest-first commit list.
    pub commit_id: u32,
    pub commit_hash: String,
    /// Unix seconds.
    pub date: i64,
}

impl SnapshotId {
    pub fn new(commit_id: u32, commit_hash: impl Into<String>, date: i64) -> Self {
        Self {
            commit_id,
            commit_hash: commit_hash.into(),
            date,
        }
    }

    /// `yyyy-MM-dd HH:mm:ss` in UTC, `None` when the date is out of range.
    pub fn timestamp(&self) -> Option<String> {
        DateTime::from_timestamp(self.date, 0).map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    pub fn date_millis(&self) -> u64 {
        u64::try_from(self.date).unwrap_or(0).saturating_mul(1000)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.commit_id, self.commit_hash)
    }
}

#[derive(Clone)]
pub enum Payload {
    /// Nothing fetched yet.
    Pending,
    Canvas {
        board: Bytes,
        width: u32,
        height: u32,
        palette: Palette,
    },
    Date,
    CanvasControl {
        placers: Bytes,
        width: u32,
        height: u32,
        top: Vec<Placer>,
    },
    /// Bytes ready to be written as-is.
    Encoded { save_type: SaveType, data: Bytes },
}

impl Payload {
    /// The artifact this payload ends up as once persisted.
    pub fn save_type(&self) -> Option<SaveType> {
        match self {
            Payload::Pending => None,
            Payload::Canvas { .. } => Some(SaveType::CanvasRender),
            Payload::Date => Some(SaveType::DateRender),
            Payload::CanvasControl { .. } => Some(SaveType::CanvasControlRender),
            Payload::Encoded { save_type, .. } => Some(*save_type),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Pending => f.write_str("Pending"),
            Payload::Canvas {
                board,
                width,
                height,
                palette,
            } => f
                .debug_struct("Canvas")
                .field("board_len", &board.len())
                .field("width", width)
                .field("height", height)
                .field("palette_len", &palette.len())
                .finish(),
            Payload::Date => f.write_str("Date"),
            Payload::CanvasControl {
                placers,
                width,
                height,
                top,
            } => f
                .debug_struct("CanvasControl")
                .field("placers_len", &placers.len())
                .field("width", width)
                .field("height", height)
                .field("top", &top.len())
                .finish(),
            Payload::Encoded { save_type, data } => f
                .debug_struct("Encoded")
                .field("save_type", save_type)
                .field("data_len", &data.len())
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotJob {
    pub id: SnapshotId,
    pub payload: Payload,
    pub target_path: Option<PathBuf>,
}

impl SnapshotJob {
    pub fn pending(id: SnapshotId) -> Self {
        Self {
            id,
            payload: Payload::Pending,
            target_path: None,
        }
    }
}

impl fmt::Display for SnapshotJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.payload.save_type() {
            Some(save_type) => write!(f, "{} ({:?})", self.id, save_type),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Result of one persisted job, never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    pub save_type: SaveType,
    pub commit_id: u32,
    pub commit_hash: String,
    pub date: i64,
    pub path: PathBuf,
}

impl SaveRecord {
    pub fn date_millis(&self) -> u64 {
        u64::try_from(self.date).unwrap_or(0).saturating_mul(1000)
    }
}
