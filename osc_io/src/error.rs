use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum OscError {
    /// Datagram shorter than the smallest valid OSC message.
    ShortPacket(usize),
    /// A path or tag string ran past the end of the packet.
    UnterminatedString,
    /// Tag string does not start with `,`.
    MissingTypeTags,
    UnsupportedTypeTag(char),
    /// Payload ended before all tagged arguments were read.
    TruncatedArguments,
    Bind(String),
    Send(String),
    ChannelClosed,
}

impl Error for OscError {}

impl fmt::Display for OscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscError::ShortPacket(len) => write!(f, "OSC packet of {len} bytes is too short"),
            OscError::UnterminatedString => write!(f, "OSC string is not NUL-terminated"),
            OscError::MissingTypeTags => write!(f, "OSC type tag string must start with ','"),
            OscError::UnsupportedTypeTag(tag) => write!(f, "unsupported OSC type tag '{tag}'"),
            OscError::TruncatedArguments => write!(f, "OSC payload shorter than its type tags"),
            OscError::Bind(msg) => write!(f, "OSC bind error: {msg}"),
            OscError::Send(msg) => write!(f, "OSC send error: {msg}"),
            OscError::ChannelClosed => write!(f, "OSC client is shut down"),
        }
    }
}
