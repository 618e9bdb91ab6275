//! Repair state machine.
//!
//! ```text
//! Draft --valid--> Validated
//! Draft --invalid--> Invalid --regenerated--> Repaired --valid--> Validated
//!                                             Repaired --invalid--> Failed
//! ```
//!
//! Only `Invalid` accepts a regeneration and only `Draft` can become
//! `Invalid`, so a question gets at most one repair.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    Draft,
    Invalid,
    Repaired,
    Validated,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The current candidate went through the validator.
    Checked { valid: bool },
    /// A repaired candidate was generated.
    Regenerated,
}

impl RepairState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RepairState::Validated | RepairState::Failed)
    }

    /// States holding a candidate that still needs validating.
    pub fn awaits_validation(&self) -> bool {
        matches!(self, RepairState::Draft | RepairState::Repaired)
    }
}

/// Pure transition function. Events that make no sense in a state end the
/// machine in `Failed`.
pub fn step(state: RepairState, event: Event) -> RepairState {
    use RepairState::*;

    match (state, event) {
        (Draft, Event::Checked { valid: true }) => Validated,
        (Draft, Event::Checked { valid: false }) => Invalid,
        (Invalid, Event::Regenerated) => Repaired,
        (Repaired, Event::Checked { valid: true }) => Validated,
        (Repaired, Event::Checked { valid: false }) => Failed,
        _ => Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[Event]) -> RepairState {
        events.iter().fold(RepairState::Draft, |s, e| step(s, *e))
    }

    #[test]
    fn first_attempt_success() {
        assert_eq!(run(&[Event::Checked { valid: true }]), RepairState::Validated);
    }

    #[test]
    fn success_after_one_repair() {
        let events = [
            Event::Checked { valid: false },
            Event::Regenerated,
            Event::Checked { valid: true },
        ];
        assert_eq!(run(&events), RepairState::Validated);
    }

    #[test]
    fn second_failure_is_terminal() {
        let events = [
            Event::Checked { valid: false },
            Event::Regenerated,
            Event::Checked { valid: false },
        ];
        assert_eq!(run(&events), RepairState::Failed);
        // nothing leaves a terminal state
        assert_eq!(step(RepairState::Failed, Event::Regenerated), RepairState::Failed);
    }

    #[test]
    fn regeneration_only_from_invalid() {
        assert_eq!(step(RepairState::Draft, Event::Regenerated), RepairState::Failed);
        assert_eq!(step(RepairState::Repaired, Event::Regenerated), RepairState::Failed);
        assert_eq!(step(RepairState::Validated, Event::Regenerated), RepairState::Failed);
    }

    #[test]
    fn terminal_and_pending_states() {
        assert!(RepairState::Validated.is_terminal());
        assert!(RepairState::Failed.is_terminal());
        assert!(RepairState::Draft.awaits_validation());
        assert!(RepairState::Repaired.awaits_validation());
        assert!(!RepairState::Invalid.awaits_validation());
    }
}
