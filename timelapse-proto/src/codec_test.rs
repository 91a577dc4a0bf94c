use crate::codec::{decode, encode};
use crate::error::ProtocolError;
use crate::message::{
    LogLevel, Message, SaveEntry, SaveGroup, StageWorkers, StartCommand, WorkerEntry, WorkerState,
};

fn sample_messages() -> Vec<Message> {
    vec![
        Message::LogMessage {
            level: LogLevel::Warning,
            unix_seconds: 1_690_000_000,
            message: "dropped #4 (CanvasRender): board too small".to_string(),
        },
        Message::WorkerStatus {
            stages: vec![
                StageWorkers {
                    stage_id: 0,
                    workers: vec![
                        WorkerEntry {
                            worker_id: 0,
                            status: WorkerState::Active,
                        },
                        WorkerEntry {
                            worker_id: 1,
                            status: WorkerState::Waiting,
                        },
                    ],
                },
                StageWorkers {
                    stage_id: 1,
                    workers: vec![],
                },
            ],
        },
        Message::SaveStatus {
            completed_count: 12,
            per_second: 2.5,
            groups: vec![SaveGroup {
                save_type: 2,
                records: vec![SaveEntry {
                    commit_id: 3,
                    commit_hash: "0f1e2d".to_string(),
                    date_millis: 1_690_000_000_000,
                    path: "output/canvas1/2023-07-22 04:26:40.png".to_string(),
                }],
            }],
        },
        Message::Start(StartCommand {
            repo_url: "https://github.com/rplacetk/canvas1".to_string(),
            download_base_url: "https://raw.githubusercontent.com/rplacetk/canvas1".to_string(),
            game_server_base_url: "https://server.rplace.live".to_string(),
            commit_hashes_file_name: "commit_hashes.txt".to_string(),
            max_top_placers: 10,
        }),
        Message::Stop,
        Message::AddWorker {
            stage_id: 1,
            change_by: 2,
        },
        Message::RemoveWorker {
            stage_id: 2,
            change_by: -1,
        },
    ]
}

#[test]
fn test_round_trip_every_opcode() -> anyhow::Result<()> {
    for message in sample_messages() {
        let frame = encode(&message)?;
        assert_eq!(frame[0], message.opcode());
        assert_eq!(decode(&frame)?, message);
    }
    Ok(())
}

#[test]
fn test_truncated_frames_are_malformed() -> anyhow::Result<()> {
    for message in sample_messages() {
        let frame = encode(&message)?;
        for len in 0..frame.len() {
            let err = decode(&frame[..len]).expect_err("truncated frame decoded");
            assert!(err.is_malformed(), "{:?} at {} bytes: {}", message, len, err);
        }
    }
    Ok(())
}

#[test]
fn test_add_worker_layout() -> anyhow::Result<()> {
    let frame = encode(&Message::AddWorker {
        stage_id: 1,
        change_by: 2,
    })?;
    assert_eq!(&frame[..], &[18, 1, 2, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_log_message_layout() -> anyhow::Result<()> {
    let frame = encode(&Message::LogMessage {
        level: LogLevel::Error,
        unix_seconds: 1,
        message: "hi".to_string(),
    })?;
    assert_eq!(
        &frame[..],
        &[0, 2, 1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, b'h', b'i']
    );
    Ok(())
}

#[test]
fn test_rejects_unknown_opcode_and_trailing_bytes() -> anyhow::Result<()> {
    assert_eq!(decode(&[7]), Err(ProtocolError::UnknownOpcode(7)));
    assert_eq!(decode(&[]), Err(ProtocolError::Empty));
    assert_eq!(decode(&[17, 0]), Err(ProtocolError::TrailingBytes(1)));
    Ok(())
}

#[test]
fn test_rejects_bad_enum_and_utf8() -> anyhow::Result<()> {
    let bad_level = [0, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    assert!(matches!(
        decode(&bad_level),
        Err(ProtocolError::InvalidValue {
            field: "logLevel",
            value: 9
        })
    ));

    let bad_utf8 = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0xff];
    assert!(matches!(
        decode(&bad_utf8),
        Err(ProtocolError::InvalidUtf8 { field: "message" })
    ));
    Ok(())
}

#[test]
fn test_encode_rejects_oversized_arrays() {
    let stages = (0..=u8::MAX as usize)
        .map(|i| StageWorkers {
            stage_id: i as u8,
            workers: vec![],
        })
        .collect::<Vec<_>>();
    let err = encode(&Message::WorkerStatus { stages }).expect_err("256 stages encoded");
    assert_eq!(
        err,
        ProtocolError::FieldOverflow {
            field: "stageCount",
            len: 256
        }
    );
    assert!(!err.is_malformed());
}

#[test]
fn test_log_level_wire_values() {
    assert_eq!(LogLevel::try_from(0), Ok(LogLevel::Info));
    assert_eq!(LogLevel::try_from(1), Ok(LogLevel::Warning));
    assert_eq!(LogLevel::try_from(2), Ok(LogLevel::Error));
    assert_eq!(LogLevel::try_from(3), Err(3));
    assert_eq!(WorkerState::try_from(1), Ok(WorkerState::Active));
    assert_eq!(WorkerState::try_from(9), Err(9));
}
