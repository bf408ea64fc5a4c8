//! Phase results.

use std::fmt;

/// What a phase did to the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseStatus {
    /// The IR is unchanged.
    ModifiedNothing,
    /// The IR may have changed anywhere.
    ModifiedEverything,
}

impl PhaseStatus {
    /// Status for a phase that changed something iff `changed`.
    pub fn from_changed(changed: bool) -> Self {
        if changed {
            PhaseStatus::ModifiedEverything
        } else {
            PhaseStatus::ModifiedNothing
        }
    }

    /// Whether the phase changed anything.
    pub fn is_modified(self) -> bool {
        self == PhaseStatus::ModifiedEverything
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseStatus::ModifiedNothing => f.write_str("modified nothing"),
            PhaseStatus::ModifiedEverything => f.write_str("modified everything"),
        }
    }
}
