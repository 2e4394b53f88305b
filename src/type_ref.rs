use std::fmt;

use serde::{Deserialize, Serialize};

use crate::internal_error;

/// Handle to a node in one graph generation.
///
/// A reference is only meaningful against the generation whose serial it
/// carries; node `3` of generation 5 and node `3` of generation 6 are
/// unrelated.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    serial: u32,
    index: u32,
}

impl TypeRef {
    pub(crate) fn new(serial: u32, index: usize) -> Self {
        let Ok(index) = u32::try_from(index) else {
            internal_error!("type index {index} does not fit a type reference");
        };
        Self { serial, index }
    }

    pub fn serial(self) -> u32 {
        self.serial
    }

    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Panics unless this reference belongs to the generation `serial`.
    pub fn assert_serial(self, serial: u32) {
        if self.serial != serial {
            internal_error!(
                "type reference {self:?} used with graph generation {serial}"
            );
        }
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.serial)
    }
}
