use std::error::Error;
use std::fmt;

use kuka_c3::C3Error;
use osc_io::OscError;

/// Fatal gateway errors: configuration and startup problems that abort the
/// process, as opposed to per-cue failures reported over OSC.
#[derive(Debug)]
pub enum GateError {
    Config(String),
    Startup(String),
    C3(C3Error),
    Osc(OscError),
}

impl Error for GateError {}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::Config(msg) => write!(f, "configuration error: {msg}"),
            GateError::Startup(msg) => write!(f, "startup error: {msg}"),
            GateError::C3(err) => write!(f, "C3 error: {err}"),
            GateError::Osc(err) => write!(f, "OSC error: {err}"),
        }
    }
}

impl From<C3Error> for GateError {
    fn from(err: C3Error) -> Self {
        GateError::C3(err)
    }
}

impl From<OscError> for GateError {
    fn from(err: OscError) -> Self {
        GateError::Osc(err)
    }
}

/// Failure modes of one motion. `Broken` means the motion was commanded but
/// never settled inside tolerance before its deadline; choreography treats
/// that differently from protocol faults.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveError {
    AlreadyMoving,
    UnknownGroup(u16),
    UnknownInternalAction(u16),
    TransitionDenied { from: Option<u16>, to: u16 },
    Request(C3Error),
    Broken,
    QueueFull,
    Shutdown,
}

impl MoveError {
    pub fn is_break(&self) -> bool {
        matches!(self, MoveError::Broken)
    }
}

impl Error for MoveError {}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::AlreadyMoving => write!(f, "bot is already in movement"),
            MoveError::UnknownGroup(id) => write!(f, "MoveGroup {id} is not found"),
            MoveError::UnknownInternalAction(code) => {
                write!(f, "unknown internal action code {code}")
            }
            MoveError::TransitionDenied { from, to } => match from {
                Some(from) => write!(f, "transition from MoveGroup {from} to {to} denied"),
                None => write!(f, "transition to MoveGroup {to} denied"),
            },
            MoveError::Request(err) => write!(f, "request error: {err}"),
            MoveError::Broken => write!(f, "move timed out before reaching the target"),
            MoveError::QueueFull => write!(f, "move queue is full"),
            MoveError::Shutdown => write!(f, "bot is shutting down"),
        }
    }
}

impl From<C3Error> for MoveError {
    fn from(err: C3Error) -> Self {
        MoveError::Request(err)
    }
}

/// Outcome carried as the first argument of a position response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MoveStatus {
    Ok = 1,
    Break = 2,
    Error = 3,
}

impl MoveStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn for_outcome(outcome: &Result<(), MoveError>) -> Self {
        match outcome {
            Ok(()) => MoveStatus::Ok,
            Err(err) if err.is_break() => MoveStatus::Break,
            Err(_) => MoveStatus::Error,
        }
    }
}
