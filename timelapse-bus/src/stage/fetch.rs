use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Deserialize;

use crate::error::JobError;
use crate::event::EventBus;
use crate::job::{Payload, SaveType, SnapshotId, SnapshotJob};
use crate::palette::Palette;
use crate::placers::{Placer, parse_placers, rank_placers};
use crate::stage::persist::SaveLayout;
use crate::worker::Stage;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PaletteEntry {
    Int(u64),
    Text(String),
}

/// `metadata.json` stored next to every canvas backup.
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasMetadata {
    #[serde(default)]
    palette: Vec<PaletteEntry>,
    pub width: u32,
    pub height: u32,
}

impl CanvasMetadata {
    /// Entries are `0xRRGGBBAA`, either as numbers or numeric strings.
    pub fn palette(&self) -> Result<Palette, JobError> {
        let values = self
            .palette
            .iter()
            .map(|entry| {
                let value = match entry {
                    PaletteEntry::Int(v) => Some(*v),
                    PaletteEntry::Text(s) => s.trim().parse::<u64>().ok(),
                };
                value
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| JobError::decode(format!("bad palette entry {entry:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Palette::from_rgba_u32(&values))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    chat_name: Option<String>,
}

/// HTTP access to the canvas backup repository.
#[derive(Debug, Clone)]
pub struct CanvasClient {
    client: reqwest::Client,
    base_url: String,
}

impl CanvasClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, commit_hash: &str, file: &str) -> String {
        format!("{}/{}/{}", self.base_url, commit_hash, file)
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Bytes, JobError> {
        let fetch_err = |source: reqwest::Error| JobError::TransientFetch {
            url: url.to_string(),
            source,
        };
        self.client
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_err)?
            .bytes()
            .await
            .map_err(fetch_err)
    }

    pub async fn metadata(&self, commit_hash: &str) -> Result<CanvasMetadata, JobError> {
        let raw = self.get_bytes(&self.url(commit_hash, "metadata.json")).await?;
        serde_json::from_slice(&raw).map_err(|e| JobError::decode(format!("metadata.json: {e}")))
    }

    pub async fn board(&self, commit_hash: &str) -> Result<Bytes, JobError> {
        self.get_bytes(&self.url(commit_hash, "place")).await
    }

    pub async fn placers(&self, commit_hash: &str) -> Result<Bytes, JobError> {
        self.get_bytes(&self.url(commit_hash, "placers")).await
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub download_base_url: String,
    pub game_server_base_url: String,
    /// Zero disables the placers download and the canvas control frame.
    pub max_top_placers: u32,
    /// Also save the raw board and placers bytes under `backups/`.
    pub keep_downloads: bool,
    pub render_dates: bool,
}

/// First stage: downloads one snapshot and fans it out into render jobs.
pub struct FetchStage {
    canvas: CanvasClient,
    client: reqwest::Client,
    game_server: String,
    options: FetchOptions,
    layout: SaveLayout,
    events: EventBus,
    // successful lookups only
    users: Mutex<HashMap<u32, String>>,
}

impl FetchStage {
    pub fn new(options: FetchOptions, layout: SaveLayout, events: EventBus) -> Self {
        let client = reqwest::Client::new();
        Self {
            canvas: CanvasClient::new(client.clone(), &options.download_base_url),
            client,
            game_server: options.game_server_base_url.trim_end_matches('/').to_string(),
            options,
            layout,
            events,
            users: Mutex::new(HashMap::new()),
        }
    }

    async fn chat_name(&self, int_id: u32) -> Result<String, JobError> {
        let cached = self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&int_id)
            .cloned();
        if let Some(name) = cached {
            return Ok(name);
        }

        let url = format!("{}/users/{}", self.game_server, int_id);
        let fetch_err = |source: reqwest::Error| JobError::TransientFetch {
            url: url.clone(),
            source,
        };
        let doc: UserDocument = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_err)?
            .json()
            .await
            .map_err(fetch_err)?;

        let name = doc.chat_name.unwrap_or_else(|| format!("#{int_id}"));
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(int_id, name.clone());
        Ok(name)
    }

    /// Highest counts first. Users whose lookup fails are skipped.
    pub async fn top_placers(&self, placers: &[u32]) -> Vec<Placer> {
        let max = self.options.max_top_placers as usize;
        let mut top = Vec::with_capacity(max);
        for (int_id, count) in rank_placers(placers) {
            if top.len() >= max {
                break;
            }
            match self.chat_name(int_id).await {
                Ok(name) => top.push(Placer::new(int_id, name, count)),
                Err(e) => log::warn!("skipping placer {}: {}", int_id, e),
            }
        }
        top
    }

    async fn placer_jobs(
        &self,
        id: &SnapshotId,
        width: u32,
        height: u32,
    ) -> Result<Vec<SnapshotJob>, JobError> {
        let raw = self.canvas.placers(&id.commit_hash).await?;
        let top = self.top_placers(&parse_placers(&raw)).await;

        let mut jobs = Vec::with_capacity(2);
        if self.options.keep_downloads {
            jobs.push(self.layout.job(
                id,
                Payload::Encoded {
                    save_type: SaveType::PlacersDownload,
                    data: raw.clone(),
                },
            ));
        }
        jobs.push(self.layout.job(
            id,
            Payload::CanvasControl {
                placers: raw,
                width,
                height,
                top,
            },
        ));
        Ok(jobs)
    }

    async fn fetch(&self, id: SnapshotId) -> Result<Vec<SnapshotJob>, JobError> {
        let metadata = self.canvas.metadata(&id.commit_hash).await?;
        let palette = metadata.palette()?;
        let board = self.canvas.board(&id.commit_hash).await?;

        let mut jobs = Vec::with_capacity(5);
        if self.options.keep_downloads {
            jobs.push(self.layout.job(
                &id,
                Payload::Encoded {
                    save_type: SaveType::CanvasDownload,
                    data: board.clone(),
                },
            ));
        }
        jobs.push(self.layout.job(
            &id,
            Payload::Canvas {
                board,
                width: metadata.width,
                height: metadata.height,
                palette,
            },
        ));
        if self.options.render_dates {
            jobs.push(self.layout.job(&id, Payload::Date));
        }
        if self.options.max_top_placers > 0 {
            match self.placer_jobs(&id, metadata.width, metadata.height).await {
                Ok(placer_jobs) => jobs.extend(placer_jobs),
                // the canvas itself is still worth keeping
                Err(e) => self
                    .events
                    .warn(format!("[download] no placers for {}: {}", id, e)),
            }
        }
        Ok(jobs)
    }
}

impl Stage for FetchStage {
    type Output = SnapshotJob;

    fn process(&self, job: SnapshotJob) -> BoxFuture<'_, Result<Vec<SnapshotJob>, JobError>> {
        Box::pin(self.fetch(job.id))
    }
}

#[cfg(test)]
#[path = "fetch_test.rs"]
mod fetch_test;
