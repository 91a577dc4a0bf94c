use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: empty frame")]
    Empty,
    #[error("malformed message: unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("malformed message: {field} needs {needed} bytes but {remaining} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("malformed message: {field} has invalid value {value}")]
    InvalidValue { field: &'static str, value: u8 },
    #[error("malformed message: {field} is not valid utf-8")]
    InvalidUtf8 { field: &'static str },
    #[error("malformed message: {0} trailing bytes after opcode payload")]
    TrailingBytes(usize),
    #[error("{field} holds {len} entries which does not fit its wire width")]
    FieldOverflow { field: &'static str, len: usize },
}

impl ProtocolError {
    /// True for every decode-side failure, i.e. the frame itself was bad.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::FieldOverflow { .. })
    }
}
