use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::job::{SaveRecord, StageKind};

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub completed_count: u64,
    pub per_second: f32,
    pub per_stage_worker_counts: BTreeMap<StageKind, usize>,
}

/// One stats tick: the snapshot plus the records saved since the previous tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveStatus {
    pub stats: StatsSnapshot,
    /// Position of `new_records[0]` in the run's save log.
    pub first_index: usize,
    pub new_records: Vec<SaveRecord>,
}

struct TickCursor {
    prev_completed: u64,
    published: usize,
    last_tick: Instant,
    per_second: f32,
}

/// Append-only save log and completion counter of one run.
pub struct StatsAggregator {
    interval: Duration,
    completed: AtomicU64,
    records: Mutex<Vec<SaveRecord>>,
    cursor: Mutex<TickCursor>,
}

impl StatsAggregator {
    pub fn new(interval: Duration) -> Self {
        Self::started_at(interval, Instant::now())
    }

    /// `start` is the reference point of the first tick's throughput.
    pub fn started_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            completed: AtomicU64::new(0),
            records: Mutex::new(Vec::new()),
            cursor: Mutex::new(TickCursor {
                prev_completed: 0,
                published: 0,
                last_tick: start,
                per_second: 0.0,
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Called exactly once per job that reached the terminal sink.
    pub fn record(&self, record: SaveRecord) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push(record);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<SaveRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records re-sorted into source order, completion order is arbitrary.
    pub fn records_in_source_order(&self) -> Vec<SaveRecord> {
        let mut records = self.records();
        records.sort_by_key(|r| (r.commit_id, r.save_type));
        records
    }

    pub fn tick(&self, worker_counts: BTreeMap<StageKind, usize>) -> SaveStatus {
        self.tick_at(Instant::now(), worker_counts)
    }

    /// Throughput is measured over the time since the previous tick, so a
    /// final tick after a partial interval is not diluted.
    pub fn tick_at(&self, now: Instant, worker_counts: BTreeMap<StageKind, usize>) -> SaveStatus {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let (completed_count, new_records) = {
            let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            let fresh = records[cursor.published.min(records.len())..].to_vec();
            (self.completed_count(), fresh)
        };

        let secs = now.saturating_duration_since(cursor.last_tick).as_secs_f32();
        cursor.last_tick = now;
        let delta = completed_count.saturating_sub(cursor.prev_completed);
        let per_second = if secs > 0.0 { delta as f32 / secs } else { 0.0 };
        let first_index = cursor.published;
        cursor.prev_completed = completed_count;
        cursor.published += new_records.len();
        cursor.per_second = per_second;

        SaveStatus {
            stats: StatsSnapshot {
                completed_count,
                per_second,
                per_stage_worker_counts: worker_counts,
            },
            first_index,
            new_records,
        }
    }

    /// Records already published by earlier ticks, starting at `from`, with
    /// the figures of the last tick. Lets a consumer that missed ticks catch up.
    pub fn replay_from(&self, from: usize) -> SaveStatus {
        let cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let end = cursor.published.min(records.len());
        let start = from.min(end);
        SaveStatus {
            stats: StatsSnapshot {
                completed_count: cursor.prev_completed,
                per_second: cursor.per_second,
                per_stage_worker_counts: BTreeMap::new(),
            },
            first_index: start,
            new_records: records[start..end].to_vec(),
        }
    }
}

#[cfg(test)]
#[path = "stats_test.rs"]
mod stats_test;
