//! Per-contact call state machine
//!
//! A pure function of `(current state, event) -> transition`. It never touches
//! the store or the provider; callers persist the new state and execute the
//! returned side effects.
//!
//! ```text
//! pending ──placed──▶ calling ──digit──▶ completed
//!    │                   │
//!    │ placement         └──ended──▶ no_response | busy | no-answer | failed | canceled
//!    │ failure                              │
//!    ▼                                      └──late digit──▶ completed
//! failed | unverified | invalid_number | no_funds
//! ```
//!
//! Recall is the only path back to `pending`.

use serde::{Deserialize, Serialize};

use crate::error::{CampaignError, Result};
use crate::events::CallEvent;
use crate::types::{ContactStatus, PlacementOutcome};

/// The slice of a contact the state machine looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactState {
    pub status: ContactStatus,
    pub digit_pressed: Option<char>,
}

impl ContactState {
    pub fn new(status: ContactStatus, digit_pressed: Option<char>) -> Self {
        Self { status, digit_pressed }
    }
}

/// Work the router performs after persisting a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideEffect {
    PlayOpeningAudio,
    PlayAfterDigitAudio,
    Hangup,
    /// Free the dispatch slot held for this call, if any
    ReleaseSlot,
}

/// Why an event left the contact untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoreReason {
    /// Same terminal information already recorded
    Duplicate,
    /// Contact is terminal and the event carries nothing that may change it
    AlreadyTerminal,
    /// Contact was never placed (or was recalled since)
    NotPlaced,
}

/// Result of feeding one event to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Status (and possibly digit) changes
    Advance {
        to: ContactState,
        effects: Vec<SideEffect>,
    },
    /// No status change, but the call needs attention
    Effects(Vec<SideEffect>),
    Ignore(IgnoreReason),
}

impl Transition {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore(_))
    }
}

/// Apply an asynchronous call event
pub fn apply_event(current: ContactState, event: &CallEvent) -> Transition {
    use ContactStatus::*;

    match event {
        CallEvent::Answered { .. } => match current.status {
            Calling => Transition::Effects(vec![SideEffect::PlayOpeningAudio]),
            Pending => Transition::Ignore(IgnoreReason::NotPlaced),
            _ => Transition::Ignore(IgnoreReason::AlreadyTerminal),
        },

        CallEvent::DigitPressed { digit, .. } => match current.status {
            Calling => Transition::Advance {
                to: ContactState::new(Completed, Some(*digit)),
                effects: vec![
                    SideEffect::PlayAfterDigitAudio,
                    SideEffect::Hangup,
                    SideEffect::ReleaseSlot,
                ],
            },
            Completed => Transition::Ignore(IgnoreReason::Duplicate),
            // ended event overtook the digit: the digit still wins
            status if status.is_ended_without_digit() => Transition::Advance {
                to: ContactState::new(Completed, Some(*digit)),
                effects: Vec::new(),
            },
            Pending => Transition::Ignore(IgnoreReason::NotPlaced),
            _ => Transition::Ignore(IgnoreReason::AlreadyTerminal),
        },

        CallEvent::CallEnded {
            outcome,
            digit_pressed,
            ..
        } => match (current.status, digit_pressed) {
            (Calling, Some(digit)) => Transition::Advance {
                to: ContactState::new(Completed, Some(*digit)),
                effects: vec![SideEffect::ReleaseSlot],
            },
            (Calling, None) => Transition::Advance {
                to: ContactState::new(outcome.status_without_digit(), None),
                effects: vec![SideEffect::ReleaseSlot],
            },
            (Completed, _) => Transition::Ignore(IgnoreReason::Duplicate),
            (status, Some(digit)) if status.is_ended_without_digit() => Transition::Advance {
                to: ContactState::new(Completed, Some(*digit)),
                effects: Vec::new(),
            },
            (Pending, _) => Transition::Ignore(IgnoreReason::NotPlaced),
            (status, None) if status.is_ended_without_digit() => {
                Transition::Ignore(IgnoreReason::Duplicate)
            }
            _ => Transition::Ignore(IgnoreReason::AlreadyTerminal),
        },
    }
}

/// Status after a placement attempt; only `pending` contacts may be placed
pub fn apply_placement(current: ContactStatus, outcome: PlacementOutcome) -> Result<ContactStatus> {
    if current != ContactStatus::Pending {
        return Err(CampaignError::routing(format!(
            "cannot place a call for a contact in state {}",
            current
        )));
    }
    Ok(outcome.contact_status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallOutcome, CallReference};

    fn reference() -> CallReference {
        CallReference::new("CA-test")
    }

    fn digit(d: char) -> CallEvent {
        CallEvent::DigitPressed { call_reference: reference(), digit: d }
    }

    fn ended(outcome: CallOutcome, digit_pressed: Option<char>) -> CallEvent {
        CallEvent::CallEnded { call_reference: reference(), outcome, digit_pressed }
    }

    fn calling() -> ContactState {
        ContactState::new(ContactStatus::Calling, None)
    }

    #[test]
    fn test_digit_completes_call() {
        let transition = apply_event(calling(), &digit('3'));
        assert_eq!(
            transition,
            Transition::Advance {
                to: ContactState::new(ContactStatus::Completed, Some('3')),
                effects: vec![
                    SideEffect::PlayAfterDigitAudio,
                    SideEffect::Hangup,
                    SideEffect::ReleaseSlot
                ],
            }
        );
    }

    #[test]
    fn test_digit_then_ended_keeps_completed() {
        let completed = ContactState::new(ContactStatus::Completed, Some('3'));
        let transition = apply_event(completed, &ended(CallOutcome::NoResponse, None));
        assert_eq!(transition, Transition::Ignore(IgnoreReason::Duplicate));

        // a different digit on the ended event does not overwrite
        let transition = apply_event(completed, &ended(CallOutcome::Completed, Some('9')));
        assert_eq!(transition, Transition::Ignore(IgnoreReason::Duplicate));
    }

    #[test]
    fn test_ended_then_late_digit_upgrades_to_completed() {
        let after_end = match apply_event(calling(), &ended(CallOutcome::NoResponse, None)) {
            Transition::Advance { to, .. } => to,
            other => panic!("unexpected transition {:?}", other),
        };
        assert_eq!(after_end.status, ContactStatus::NoResponse);

        match apply_event(after_end, &digit('5')) {
            Transition::Advance { to, effects } => {
                assert_eq!(to, ContactState::new(ContactStatus::Completed, Some('5')));
                assert!(effects.is_empty());
            }
            other => panic!("unexpected transition {:?}", other),
        }
    }

    #[test]
    fn test_ended_outcomes() {
        for (outcome, status) in [
            (CallOutcome::Completed, ContactStatus::NoResponse),
            (CallOutcome::Busy, ContactStatus::Busy),
            (CallOutcome::NoAnswer, ContactStatus::NoAnswer),
            (CallOutcome::Failed, ContactStatus::Failed),
            (CallOutcome::Canceled, ContactStatus::Canceled),
        ] {
            match apply_event(calling(), &ended(outcome, None)) {
                Transition::Advance { to, effects } => {
                    assert_eq!(to.status, status);
                    assert_eq!(effects, vec![SideEffect::ReleaseSlot]);
                }
                other => panic!("unexpected transition {:?}", other),
            }
        }
    }

    #[test]
    fn test_ended_with_digit_completes() {
        match apply_event(calling(), &ended(CallOutcome::Completed, Some('1'))) {
            Transition::Advance { to, .. } => {
                assert_eq!(to, ContactState::new(ContactStatus::Completed, Some('1')))
            }
            other => panic!("unexpected transition {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_terminal_events_are_ignored() {
        let busy = ContactState::new(ContactStatus::Busy, None);
        assert!(apply_event(busy, &ended(CallOutcome::Busy, None)).is_ignored());
        assert!(apply_event(busy, &CallEvent::Answered { call_reference: reference() }).is_ignored());

        let completed = ContactState::new(ContactStatus::Completed, Some('2'));
        assert_eq!(apply_event(completed, &digit('2')), Transition::Ignore(IgnoreReason::Duplicate));
    }

    #[test]
    fn test_events_for_unplaced_contacts_are_ignored() {
        let pending = ContactState::new(ContactStatus::Pending, None);
        assert_eq!(apply_event(pending, &digit('1')), Transition::Ignore(IgnoreReason::NotPlaced));
        assert_eq!(
            apply_event(pending, &ended(CallOutcome::Busy, None)),
            Transition::Ignore(IgnoreReason::NotPlaced)
        );

        let unverified = ContactState::new(ContactStatus::Unverified, None);
        assert_eq!(
            apply_event(unverified, &digit('1')),
            Transition::Ignore(IgnoreReason::AlreadyTerminal)
        );
    }

    #[test]
    fn test_answer_plays_opening_audio() {
        assert_eq!(
            apply_event(calling(), &CallEvent::Answered { call_reference: reference() }),
            Transition::Effects(vec![SideEffect::PlayOpeningAudio])
        );
    }

    #[test]
    fn test_placement_requires_pending() {
        assert_eq!(
            apply_placement(ContactStatus::Pending, PlacementOutcome::Started).unwrap(),
            ContactStatus::Calling
        );
        assert_eq!(
            apply_placement(ContactStatus::Pending, PlacementOutcome::NoFunds).unwrap(),
            ContactStatus::NoFunds
        );
        assert!(apply_placement(ContactStatus::Calling, PlacementOutcome::Started).is_err());
    }
}
