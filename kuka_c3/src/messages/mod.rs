mod message;
mod variables;
pub mod wire;

pub use message::{C3Message, C3MessageType, C3Variable};
pub use variables::{com_action, C3VariableName, COM_ROUNDM_NONE};
