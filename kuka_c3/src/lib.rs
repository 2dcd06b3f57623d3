pub mod drivers;
pub mod errors;
pub mod messages;

mod move_group;
mod position;

pub use errors::{C3Error, C3ErrorCode};
pub use move_group::MoveGroup;
pub use position::{Position, PositionKind};
