//! Ear side / output channel selection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ear under test. Each ear maps to exactly one output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ear {
    Left,
    Right,
}

impl Ear {
    /// Interleaved channel slot written for this ear (left = 0, right = 1)
    #[inline]
    pub fn channel_index(self) -> usize {
        match self {
            Ear::Left => 0,
            Ear::Right => 1,
        }
    }

    /// The ear that must stay silent while this one is tested
    pub fn opposite(self) -> Ear {
        match self {
            Ear::Left => Ear::Right,
            Ear::Right => Ear::Left,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Ear::Left => "LEFT",
            Ear::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Ear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
