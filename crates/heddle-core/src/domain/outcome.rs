//! Outcome model: the result vocabulary of every decider.
//!
//! A closed sum type, consumed with exhaustive `match` so a new shape can never
//! fall through a composition unhandled.

use super::decision::Decision;

/// What a decider concluded about one (context, event, data) triple.
///
/// - `Pass`: not applicable; contributes nothing.
/// - `Continue`: contributes decisions/data, later rules still run.
/// - `Transition`: contributes decisions/data and moves to `state`; ends the composition.
/// - `Complete`: contributes decisions and final data; the execution should end.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<D> {
    Pass,

    Continue {
        decisions: Vec<Decision>,
        data: D,
    },

    Transition {
        decisions: Vec<Decision>,
        data: D,
        state: String,
    },

    Complete {
        decisions: Vec<Decision>,
        data: D,
    },
}

impl<D> Outcome<D> {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    pub fn decisions(&self) -> &[Decision] {
        match self {
            Outcome::Pass => &[],
            Outcome::Continue { decisions, .. }
            | Outcome::Transition { decisions, .. }
            | Outcome::Complete { decisions, .. } => decisions,
        }
    }

    pub fn data(&self) -> Option<&D> {
        match self {
            Outcome::Pass => None,
            Outcome::Continue { data, .. }
            | Outcome::Transition { data, .. }
            | Outcome::Complete { data, .. } => Some(data),
        }
    }

    /// Target state of a Transition.
    pub fn state(&self) -> Option<&str> {
        match self {
            Outcome::Transition { state, .. } => Some(state),
            _ => None,
        }
    }
}
