use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

use crate::error::JobError;
use crate::job::{Payload, SaveRecord, SaveType, SnapshotId, SnapshotJob};
use crate::worker::Stage;

/// Output layout of one canvas:
///
/// ```text
/// <output_dir>/<canvas>/backups/<yyyy-MM-dd HH:mm:ss>.png
/// <output_dir>/<canvas>/downloads/<ts>
/// <output_dir>/<canvas>/placers/<ts>
/// <output_dir>/<canvas>/dates/<ts>.png
/// <output_dir>/<canvas>/top_placers/<ts>.png
/// <output_dir>/<canvas>/canvas_controls/<ts>.png
/// ```
#[derive(Debug, Clone)]
pub struct SaveLayout {
    root: PathBuf,
}

impl SaveLayout {
    pub fn new(output_dir: impl AsRef<Path>, canvas: &str) -> Self {
        Self {
            root: output_dir.as_ref().join(canvas),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, save_type: SaveType) -> PathBuf {
        self.root.join(save_type.dir_name())
    }

    pub fn path_for(&self, save_type: SaveType, id: &SnapshotId) -> Option<PathBuf> {
        let ts = id.timestamp()?;
        Some(self.dir(save_type).join(format!("{ts}{}", save_type.file_suffix())))
    }

    /// Every directory a run writes into.
    pub fn directories(&self) -> Vec<PathBuf> {
        SaveType::ALL.map(|t| self.dir(t)).to_vec()
    }

    /// A job for `id` carrying `payload`, targeted at its final path.
    pub fn job(&self, id: &SnapshotId, payload: Payload) -> SnapshotJob {
        let target_path = payload
            .save_type()
            .and_then(|save_type| self.path_for(save_type, id));
        SnapshotJob {
            id: id.clone(),
            payload,
            target_path,
        }
    }
}

/// Terminal stage: writes encoded bytes to the job's target path.
#[derive(Debug, Default)]
pub struct PersistStage;

impl PersistStage {
    async fn save(job: SnapshotJob) -> Result<SaveRecord, JobError> {
        let (save_type, data) = match job.payload {
            Payload::Encoded { save_type, data } => (save_type, data),
            other => return Err(JobError::decode(format!("{other:?} is not ready to save"))),
        };
        let path = job.target_path.ok_or(JobError::MissingTarget)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| JobError::Persist {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|source| JobError::Persist {
                path: path.clone(),
                source,
            })?;

        Ok(SaveRecord {
            save_type,
            commit_id: job.id.commit_id,
            commit_hash: job.id.commit_hash,
            date: job.id.date,
            path,
        })
    }
}

impl Stage for PersistStage {
    type Output = SaveRecord;

    fn process(&self, job: SnapshotJob) -> BoxFuture<'_, Result<Vec<SaveRecord>, JobError>> {
        Box::pin(async move { Ok(vec![Self::save(job).await?]) })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = SaveLayout::new("output", "canvas1");
        let id = SnapshotId::new(0, "abc", 1_690_000_000);

        assert_eq!(
            layout.path_for(SaveType::CanvasRender, &id),
            Some(PathBuf::from("output/canvas1/backups/2023-07-22 04:26:40.png"))
        );
        assert_eq!(
            layout.path_for(SaveType::PlacersDownload, &id),
            Some(PathBuf::from("output/canvas1/placers/2023-07-22 04:26:40"))
        );
        assert_eq!(
            layout.path_for(SaveType::CanvasDownload, &id),
            Some(PathBuf::from("output/canvas1/downloads/2023-07-22 04:26:40"))
        );
        assert_eq!(layout.directories().len(), 6);
        assert_eq!(layout.path_for(SaveType::DateRender, &SnapshotId::new(0, "x", i64::MAX)), None);
    }

    #[tokio::test]
    async fn test_persist_creates_parents() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = SaveLayout::new(dir.path(), "canvas1");
        let id = SnapshotId::new(3, "abc", 1_690_000_000);
        let job = layout.job(
            &id,
            Payload::Encoded {
                save_type: SaveType::DateRender,
                data: Bytes::from_static(b"png"),
            },
        );

        let records = PersistStage.process(job).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].save_type, SaveType::DateRender);
        assert_eq!(records[0].commit_id, 3);
        assert_eq!(tokio::fs::read(&records[0].path).await?, b"png");
        assert!(records[0].path.starts_with(dir.path().join("canvas1/dates")));
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_rejects_unrendered_or_untargeted() {
        let id = SnapshotId::new(0, "abc", 0);
        let pending = SnapshotJob::pending(id.clone());
        assert!(matches!(
            PersistStage.process(pending).await,
            Err(JobError::Decode(_))
        ));

        let untargeted = SnapshotJob {
            id,
            payload: Payload::Encoded {
                save_type: SaveType::CanvasRender,
                data: Bytes::new(),
            },
            target_path: None,
        };
        assert!(matches!(
            PersistStage.process(untargeted).await,
            Err(JobError::MissingTarget)
        ));
    }
}
