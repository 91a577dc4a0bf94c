//! Binary control/event protocol spoken between the generator and its observers.
//!
//! Every frame starts with a one byte opcode followed by a fixed, per-opcode
//! layout. Integers and floats are little-endian, strings are a `u32` byte
//! length followed by UTF-8, arrays are count-prefixed.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode, encode};
pub use error::ProtocolError;
pub use message::{
    LogLevel, Message, SaveEntry, SaveGroup, StageWorkers, StartCommand, WorkerEntry, WorkerState,
    opcode,
};
