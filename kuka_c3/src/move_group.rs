use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Group IDs reserved for internal robot routines. Running one issues a
/// single COM_ACTION write instead of a position sequence and returns the
/// robot to the HOME pose.
pub const INTERNAL_GROUP_IDS: [u16; 4] = [100, 200, 300, 400];

/// A named, ordered sequence of target positions identified by a 16-bit ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveGroup {
    pub id: u16,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl MoveGroup {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            positions: Vec::new(),
        }
    }

    pub fn is_internal(id: u16) -> bool {
        INTERNAL_GROUP_IDS.contains(&id)
    }
}
