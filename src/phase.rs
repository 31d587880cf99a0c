// --- File: src/phase.rs ---

//! Train / evaluate phase selector.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of one pass over a loader.
///
/// Passed explicitly to the transform chain and to the model instead of
/// flipping a mode flag on shared objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Gradients are computed and parameters are updated.
    Train,
    /// Forward pass only.
    Eval,
}

impl Phase {
    /// Returns `true` for [`Phase::Train`].
    pub fn is_train(self) -> bool {
        matches!(self, Phase::Train)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Eval => "eval",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
