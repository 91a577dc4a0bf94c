use crate::error::JobError;
use crate::event::EventBus;
use crate::job::{Payload, SaveType, SnapshotId, SnapshotJob};
use crate::palette::Colour;
use crate::stage::fetch::{FetchOptions, FetchStage};
use crate::stage::persist::SaveLayout;
use crate::test_support::serve_canvas;
use crate::worker::Stage;

fn options(base: &str, max_top_placers: u32) -> FetchOptions {
    FetchOptions {
        download_base_url: format!("{base}/canvas/"),
        game_server_base_url: format!("{base}/game"),
        max_top_placers,
        keep_downloads: true,
        render_dates: true,
    }
}

#[tokio::test]
async fn test_fetch_fans_out_every_artifact() -> anyhow::Result<()> {
    let base = serve_canvas().await?;
    let dir = tempfile::tempdir()?;
    let stage = FetchStage::new(
        options(&base, 2),
        SaveLayout::new(dir.path(), "canvas1"),
        EventBus::default(),
    );

    let id = SnapshotId::new(0, "abc", 1_690_000_000);
    let jobs = stage.process(SnapshotJob::pending(id.clone())).await?;
    let types = jobs
        .iter()
        .map(|job| job.payload.save_type())
        .collect::<Vec<_>>();
    assert_eq!(
        types,
        vec![
            Some(SaveType::CanvasDownload),
            Some(SaveType::CanvasRender),
            Some(SaveType::DateRender),
            Some(SaveType::PlacersDownload),
            Some(SaveType::CanvasControlRender),
        ]
    );
    assert!(jobs.iter().all(|job| job.id == id && job.target_path.is_some()));

    match &jobs[1].payload {
        Payload::Canvas {
            board,
            width,
            height,
            palette,
        } => {
            assert_eq!(board.as_ref(), &[0, 1, 1, 0]);
            assert_eq!((*width, *height), (2, 2));
            assert_eq!(palette.colour(1), Colour([0, 255, 0, 255]));
        }
        other => anyhow::bail!("unexpected payload {:?}", other),
    }
    match &jobs[4].payload {
        Payload::CanvasControl { top, .. } => {
            // user 8 cannot be resolved and is skipped
            assert_eq!(top.len(), 1);
            assert_eq!(top[0].chat_name, "seven");
            assert_eq!(top[0].pixels_placed, 2);
        }
        other => anyhow::bail!("unexpected payload {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_fetch_minimal_and_missing() -> anyhow::Result<()> {
    let base = serve_canvas().await?;
    let dir = tempfile::tempdir()?;
    let mut opts = options(&base, 0);
    opts.keep_downloads = false;
    opts.render_dates = false;
    let stage = FetchStage::new(
        opts,
        SaveLayout::new(dir.path(), "canvas1"),
        EventBus::default(),
    );

    let jobs = stage
        .process(SnapshotJob::pending(SnapshotId::new(0, "abc", 0)))
        .await?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].payload.save_type(), Some(SaveType::CanvasRender));

    let missing = stage
        .process(SnapshotJob::pending(SnapshotId::new(1, "missing", 0)))
        .await;
    assert!(matches!(missing, Err(JobError::TransientFetch { .. })));
    Ok(())
}
