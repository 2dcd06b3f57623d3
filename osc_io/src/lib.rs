mod client;
mod error;
mod packet;
mod server;

pub use client::OscClient;
pub use error::OscError;
pub use packet::{OscPacket, OscValue};
pub use server::{OscListener, OscServer};
