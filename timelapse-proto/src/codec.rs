use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::message::{
    LogLevel, Message, SaveEntry, SaveGroup, StageWorkers, StartCommand, WorkerEntry, WorkerState,
    opcode,
};

pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let mut out = Writer::default();
    out.buf.put_u8(message.opcode());

    match message {
        Message::LogMessage {
            level,
            unix_seconds,
            message,
        } => {
            out.buf.put_u8(*level as u8);
            out.buf.put_u64_le(*unix_seconds);
            out.string("message", message)?;
        }
        Message::WorkerStatus { stages } => {
            out.buf.put_u8(count_u8("stageCount", stages.len())?);
            for stage in stages {
                out.buf.put_u8(stage.stage_id);
                out.buf.put_u8(count_u8("workerCount", stage.workers.len())?);
                for worker in &stage.workers {
                    out.buf.put_u8(worker.worker_id);
                    out.buf.put_u8(worker.status as u8);
                }
            }
        }
        Message::SaveStatus {
            completed_count,
            per_second,
            groups,
        } => {
            out.buf.put_u32_le(*completed_count);
            out.buf.put_f32_le(*per_second);
            out.buf.put_u8(count_u8("saveTypeCount", groups.len())?);
            for group in groups {
                out.buf.put_u8(group.save_type);
                out.buf.put_u32_le(count_u32("recordCount", group.records.len())?);
                for record in &group.records {
                    out.buf.put_u32_le(record.commit_id);
                    out.string("commitHash", &record.commit_hash)?;
                    out.buf.put_u64_le(record.date_millis);
                    out.string("path", &record.path)?;
                }
            }
        }
        Message::Start(start) => {
            out.string("repoUrl", &start.repo_url)?;
            out.string("downloadBaseUrl", &start.download_base_url)?;
            out.string("gameServerBaseUrl", &start.game_server_base_url)?;
            out.string("commitHashesFileName", &start.commit_hashes_file_name)?;
            out.buf.put_u32_le(start.max_top_placers);
        }
        Message::Stop => {}
        Message::AddWorker {
            stage_id,
            change_by,
        }
        | Message::RemoveWorker {
            stage_id,
            change_by,
        } => {
            out.buf.put_u8(*stage_id);
            out.buf.put_i32_le(*change_by);
        }
    }

    Ok(out.buf.freeze())
}

/// Decodes exactly one frame. The whole buffer must be consumed by the
/// opcode's layout, leftover bytes are treated as malformed.
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    if frame.is_empty() {
        return Err(ProtocolError::Empty);
    }
    let mut r = Reader { buf: frame };
    let op = r.u8("opcode")?;

    let message = match op {
        opcode::LOG_MESSAGE => {
            let raw = r.u8("logLevel")?;
            let level = LogLevel::try_from(raw).map_err(|value| ProtocolError::InvalidValue {
                field: "logLevel",
                value,
            })?;
            Message::LogMessage {
                level,
                unix_seconds: r.u64("unixSeconds")?,
                message: r.string("message")?,
            }
        }
        opcode::WORKER_STATUS => {
            let stage_count = r.u8("stageCount")?;
            let mut stages = Vec::with_capacity(stage_count as usize);
            for _ in 0..stage_count {
                let stage_id = r.u8("stageId")?;
                let worker_count = r.u8("workerCount")?;
                let mut workers = Vec::with_capacity(worker_count as usize);
                for _ in 0..worker_count {
                    let worker_id = r.u8("workerId")?;
                    let raw = r.u8("status")?;
                    let status = WorkerState::try_from(raw).map_err(|value| {
                        ProtocolError::InvalidValue {
                            field: "status",
                            value,
                        }
                    })?;
                    workers.push(WorkerEntry { worker_id, status });
                }
                stages.push(StageWorkers { stage_id, workers });
            }
            Message::WorkerStatus { stages }
        }
        opcode::SAVE_STATUS => {
            let completed_count = r.u32("completedCount")?;
            let per_second = r.f32("perSecond")?;
            let group_count = r.u8("saveTypeCount")?;
            let mut groups = Vec::with_capacity(group_count as usize);
            for _ in 0..group_count {
                let save_type = r.u8("saveType")?;
                let record_count = r.u32("recordCount")?;
                // Never trust the count for preallocation, each record is at least 20 bytes.
                let mut records = Vec::with_capacity((record_count as usize).min(r.buf.len() / 20));
                for _ in 0..record_count {
                    records.push(SaveEntry {
                        commit_id: r.u32("commitId")?,
                        commit_hash: r.string("commitHash")?,
                        date_millis: r.u64("dateMillis")?,
                        path: r.string("path")?,
                    });
                }
                groups.push(SaveGroup { save_type, records });
            }
            Message::SaveStatus {
                completed_count,
                per_second,
                groups,
            }
        }
        opcode::START => Message::Start(StartCommand {
            repo_url: r.string("repoUrl")?,
            download_base_url: r.string("downloadBaseUrl")?,
            game_server_base_url: r.string("gameServerBaseUrl")?,
            commit_hashes_file_name: r.string("commitHashesFileName")?,
            max_top_placers: r.u32("maxTopPlacers")?,
        }),
        opcode::STOP => Message::Stop,
        opcode::ADD_WORKER => Message::AddWorker {
            stage_id: r.u8("stageId")?,
            change_by: r.i32("changeBy")?,
        },
        opcode::REMOVE_WORKER => Message::RemoveWorker {
            stage_id: r.u8("stageId")?,
            change_by: r.i32("changeBy")?,
        },
        other => return Err(ProtocolError::UnknownOpcode(other)),
    };

    if r.buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes(r.buf.remaining()));
    }
    Ok(message)
}

impl Message {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        encode(self)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        decode(frame)
    }
}

#[derive(Default)]
struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn string(&mut self, field: &'static str, value: &str) -> Result<(), ProtocolError> {
        self.buf.put_u32_le(count_u32(field, value.len())?);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }
}

fn count_u8(field: &'static str, len: usize) -> Result<u8, ProtocolError> {
    u8::try_from(len).map_err(|_| ProtocolError::FieldOverflow { field, len })
}

fn count_u32(field: &'static str, len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::FieldOverflow { field, len })
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, field: &'static str, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        self.need(field, 1)?;
        Ok(self.buf.get_u8())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        self.need(field, 4)?;
        Ok(self.buf.get_i32_le())
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, ProtocolError> {
        self.need(field, 8)?;
        Ok(self.buf.get_u64_le())
    }

    fn f32(&mut self, field: &'static str) -> Result<f32, ProtocolError> {
        self.need(field, 4)?;
        Ok(self.buf.get_f32_le())
    }

    fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.u32(field)? as usize;
        self.need(field, len)?;
        let value = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| ProtocolError::InvalidUtf8 { field })?
            .to_owned();
        self.buf.advance(len);
        Ok(value)
    }
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
