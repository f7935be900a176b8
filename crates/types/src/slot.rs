//! A/B boot slot identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one of the parallel partition sets the bootloader can boot.
///
/// Real devices have two ("A" and "B"); the type allows more. The
/// distinguished [`Slot::INVALID`] value means "no slot", e.g. the source
/// slot of a full update installed onto a blank device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u32);

impl Slot {
    /// The distinguished "no slot" value.
    pub const INVALID: Slot = Slot(u32::MAX);

    /// The first slot.
    pub const A: Slot = Slot(0);

    /// The second slot.
    pub const B: Slot = Slot(1);

    /// Create a slot from its index.
    #[must_use]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// The slot's index.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }

    /// Whether this is a real slot rather than [`Slot::INVALID`].
    #[must_use]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("INVALID");
        }
        // Letters for the slot counts that occur in practice.
        if self.0 < 26 {
            let letter = char::from(b'A' + u8::try_from(self.0).unwrap_or(0));
            write!(f, "{letter}")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}
