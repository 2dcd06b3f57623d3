use std::error::Error;
use std::fmt;

use int_enum::IntEnum;

/// Errors raised by the C3 codec and client.
#[derive(Debug, Clone, PartialEq)]
pub enum C3Error {
    EmptyVariableList,
    MixedReadWrite,
    PositionFormat(String),
    Encode(String),
    Decode(String),
    TagMismatch { expected: u16, received: u16 },
    TypeMismatch { expected: u8, received: u8 },
    Code(C3ErrorCode),
    VariableCode { name: String, code: C3ErrorCode },
    AddressResolve(String),
    RequestTimeout,
    ClientShutdown,
}

impl Error for C3Error {}

impl fmt::Display for C3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            C3Error::EmptyVariableList => write!(f, "C3 message with empty variable list"),
            C3Error::MixedReadWrite => {
                write!(f, "C3 message mixes read and write variables")
            }
            C3Error::PositionFormat(msg) => write!(f, "position format error: {msg}"),
            C3Error::Encode(msg) => write!(f, "C3 encode error: {msg}"),
            C3Error::Decode(msg) => write!(f, "C3 decode error: {msg}"),
            C3Error::TagMismatch { expected, received } => write!(
                f,
                "C3 response tag {received} does not match request tag {expected}"
            ),
            C3Error::TypeMismatch { expected, received } => write!(
                f,
                "C3 response type {received} does not match request type {expected}"
            ),
            C3Error::Code(code) => write!(f, "robot returned {}", code.message()),
            C3Error::VariableCode { name, code } => {
                write!(f, "variable {name} returned {}", code.message())
            }
            C3Error::AddressResolve(msg) => write!(f, "address resolve error: {msg}"),
            C3Error::RequestTimeout => write!(f, "C3 request timed out"),
            C3Error::ClientShutdown => write!(f, "C3 client is shut down"),
        }
    }
}

/// Error codes carried on the C3 wire, per variable and per message.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum C3ErrorCode {
    General = 0,
    Success = 1,
    Access = 2,
    Argument = 3,
    Memory = 4,
    Pointer = 5,
    Unexpected = 6,
    NotImplemented = 7,
    NoInterface = 8,
    Protocol = 9,
    LongAnswer = 10,
    NotReady = 0xFFFF,
}

impl C3ErrorCode {
    /// Maps a raw wire value, collapsing unknown codes to `General`.
    pub fn from_wire(raw: u16) -> Self {
        C3ErrorCode::try_from(raw).unwrap_or(C3ErrorCode::General)
    }

    pub fn message(&self) -> &'static str {
        match self {
            C3ErrorCode::General => "General error",
            C3ErrorCode::Success => "Success",
            C3ErrorCode::Access => "Access error",
            C3ErrorCode::Argument => "Argument error",
            C3ErrorCode::Memory => "Memory error",
            C3ErrorCode::Pointer => "Pointer error",
            C3ErrorCode::Unexpected => "Unexpected error",
            C3ErrorCode::NotImplemented => "Not implemented",
            C3ErrorCode::NoInterface => "No interface",
            C3ErrorCode::Protocol => "Protocol error",
            C3ErrorCode::LongAnswer => "Long answer",
            C3ErrorCode::NotReady => "Not ready",
        }
    }
}
