use std::sync::Arc;

use futures::future::BoxFuture;
use image::RgbaImage;

use crate::error::JobError;
use crate::job::{Payload, SaveType, SnapshotJob};
use crate::overlay::{GlyphOverlay, OverlayRenderer};
use crate::palette::{decode_board, encode_png};
use crate::placers::{parse_placers, render_canvas_control};
use crate::worker::Stage;

/// Turns fetched payloads into PNG bytes. Already encoded payloads pass through.
pub struct RenderStage {
    overlay: Arc<dyn OverlayRenderer>,
}

impl Default for RenderStage {
    fn default() -> Self {
        Self::new(Arc::new(GlyphOverlay::default()))
    }
}

impl RenderStage {
    pub fn new(overlay: Arc<dyn OverlayRenderer>) -> Self {
        Self { overlay }
    }

    fn draw(overlay: &dyn OverlayRenderer, date: i64, payload: Payload) -> Result<Payload, JobError> {
        let (save_type, image): (SaveType, RgbaImage) = match payload {
            Payload::Encoded { .. } => return Ok(payload),
            Payload::Pending => return Err(JobError::decode("nothing was fetched")),
            Payload::Canvas {
                board,
                width,
                height,
                palette,
            } => (
                SaveType::CanvasRender,
                decode_board(&board, width, height, &palette)?,
            ),
            Payload::Date => (SaveType::DateRender, overlay.render_date(date)?),
            Payload::CanvasControl {
                placers,
                width,
                height,
                top,
            } => (
                SaveType::CanvasControlRender,
                render_canvas_control(&parse_placers(&placers), width, height, &top)?,
            ),
        };
        Ok(Payload::Encoded {
            save_type,
            data: encode_png(&image)?,
        })
    }
}

impl Stage for RenderStage {
    type Output = SnapshotJob;

    fn process(&self, job: SnapshotJob) -> BoxFuture<'_, Result<Vec<SnapshotJob>, JobError>> {
        Box::pin(async move {
            let SnapshotJob {
                id,
                payload,
                target_path,
            } = job;
            if let Payload::Encoded { .. } = payload {
                return Ok(vec![SnapshotJob {
                    id,
                    payload,
                    target_path,
                }]);
            }

            // decoding and PNG encoding are CPU bound
            let overlay = self.overlay.clone();
            let date = id.date;
            let payload = tokio::task::spawn_blocking(move || Self::draw(overlay.as_ref(), date, payload))
                .await
                .map_err(|e| JobError::decode(format!("render task failed: {e}")))??;

            Ok(vec![SnapshotJob {
                id,
                payload,
                target_path,
            }])
        })
    }
}
