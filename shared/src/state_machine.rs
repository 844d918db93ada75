//! Command Verification State Machine
//!
//! Defines the lifecycle of one verified command and the valid transitions
//! between its states. The machine is pure: it never publishes or arms timers,
//! it tells the caller which side effect the transition requires.

/// Lifecycle states of a verified command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationState {
    /// Nothing sent yet, or the command was verified
    Idle,
    /// Command published, waiting for a matching status
    AwaitingVerification,
    /// Verification window elapsed, waiting out the retry delay
    Retrying,
    /// Retries exhausted
    Failed,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationEvent {
    /// Command handed to the dispatcher
    Dispatched,
    /// Channel reported its state
    StatusObserved(bool),
    /// Verification window elapsed without a matching status
    DeadlineElapsed,
    /// Retry delay elapsed
    RetryDue,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Publish the command and arm the verification deadline
    Publish { attempt: u32 },
    /// Expected state observed, stop tracking
    Verified { attempts: u32 },
    /// Mismatching state recorded, keep waiting for the deadline
    Noted { observed: bool },
    /// Arm the retry delay; `attempt` is the number of the upcoming attempt
    ScheduleRetry { attempt: u32 },
    /// Retry budget spent, report failure and stop tracking
    Exhausted {
        attempts: u32,
        actual_state: Option<bool>,
    },
    /// Transition was invalid from current state
    Invalid {
        from: VerificationState,
        event: VerificationEvent,
    },
}

/// The verification state machine for one `(channel, reason)` slot
#[derive(Debug, Clone)]
pub struct VerificationMachine {
    state: VerificationState,
    expected_state: bool,
    max_retries: u32,
    attempts: u32,
    last_observed: Option<bool>,
}

impl VerificationMachine {
    /// Create a new machine in Idle state
    pub fn new(expected_state: bool, max_retries: u32) -> Self {
        Self {
            state: VerificationState::Idle,
            expected_state,
            max_retries,
            attempts: 0,
            last_observed: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> VerificationState {
        self.state
    }

    /// State the command is expected to produce
    pub fn expected_state(&self) -> bool {
        self.expected_state
    }

    /// Attempts made so far (the first send counts as one)
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Last mismatching state reported by the channel
    pub fn last_observed(&self) -> Option<bool> {
        self.last_observed
    }

    /// Whether the budget including the initial attempt is spent
    pub fn is_exhausted(&self) -> bool {
        self.attempts > self.max_retries
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: VerificationEvent) -> TransitionResult {
        use VerificationEvent::*;
        use VerificationState::*;

        match (self.state, event) {
            (Idle, Dispatched) => {
                self.attempts = 1;
                self.state = AwaitingVerification;
                TransitionResult::Publish { attempt: 1 }
            }

            // A matching reading ends the command whether or not a resend is queued
            (AwaitingVerification | Retrying, StatusObserved(observed))
                if observed == self.expected_state =>
            {
                self.state = Idle;
                TransitionResult::Verified {
                    attempts: self.attempts,
                }
            }
            (AwaitingVerification | Retrying, StatusObserved(observed)) => {
                self.last_observed = Some(observed);
                TransitionResult::Noted { observed }
            }

            (AwaitingVerification, DeadlineElapsed) if self.is_exhausted() => {
                self.state = Failed;
                TransitionResult::Exhausted {
                    attempts: self.attempts,
                    actual_state: self.last_observed,
                }
            }
            (AwaitingVerification, DeadlineElapsed) => {
                self.attempts += 1;
                self.state = Retrying;
                TransitionResult::ScheduleRetry {
                    attempt: self.attempts,
                }
            }

            (Retrying, RetryDue) => {
                self.state = AwaitingVerification;
                TransitionResult::Publish {
                    attempt: self.attempts,
                }
            }

            (from, event) => TransitionResult::Invalid { from, event },
        }
    }
}

/// Check if a transition from one state to another is valid
pub fn is_valid_transition(from: VerificationState, to: VerificationState) -> bool {
    use VerificationState::*;

    matches!(
        (from, to),
        (Idle, AwaitingVerification)
            | (AwaitingVerification, AwaitingVerification)
            | (AwaitingVerification, Idle)
            | (AwaitingVerification, Retrying)
            | (AwaitingVerification, Failed)
            | (Retrying, AwaitingVerification)
            | (Retrying, Retrying)
            | (Retrying, Idle)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = VerificationMachine::new(true, 3);
        assert_eq!(fsm.state(), VerificationState::Idle);
        assert_eq!(fsm.attempts(), 0);
    }

    #[test]
    fn test_dispatch_then_verify() {
        let mut fsm = VerificationMachine::new(true, 3);

        let result = fsm.process_event(VerificationEvent::Dispatched);
        assert_eq!(result, TransitionResult::Publish { attempt: 1 });
        assert_eq!(fsm.state(), VerificationState::AwaitingVerification);

        let result = fsm.process_event(VerificationEvent::StatusObserved(true));
        assert_eq!(result, TransitionResult::Verified { attempts: 1 });
        assert_eq!(fsm.state(), VerificationState::Idle);
    }

    #[test]
    fn test_mismatch_does_not_retry() {
        let mut fsm = VerificationMachine::new(true, 3);
        fsm.process_event(VerificationEvent::Dispatched);

        let result = fsm.process_event(VerificationEvent::StatusObserved(false));
        assert_eq!(result, TransitionResult::Noted { observed: false });
        assert_eq!(fsm.state(), VerificationState::AwaitingVerification);
        assert_eq!(fsm.attempts(), 1);
        assert_eq!(fsm.last_observed(), Some(false));
    }

    #[test]
    fn test_retry_loop_until_exhausted() {
        let mut fsm = VerificationMachine::new(true, 3);
        fsm.process_event(VerificationEvent::Dispatched);

        for attempt in 2..=4 {
            let result = fsm.process_event(VerificationEvent::DeadlineElapsed);
            assert_eq!(result, TransitionResult::ScheduleRetry { attempt });
            assert_eq!(fsm.state(), VerificationState::Retrying);

            let result = fsm.process_event(VerificationEvent::RetryDue);
            assert_eq!(result, TransitionResult::Publish { attempt });
        }

        let result = fsm.process_event(VerificationEvent::DeadlineElapsed);
        assert_eq!(
            result,
            TransitionResult::Exhausted {
                attempts: 4,
                actual_state: None
            }
        );
        assert_eq!(fsm.state(), VerificationState::Failed);
    }

    #[test]
    fn test_zero_retries_fails_after_first_window() {
        let mut fsm = VerificationMachine::new(false, 0);
        fsm.process_event(VerificationEvent::Dispatched);
        fsm.process_event(VerificationEvent::StatusObserved(true));

        let result = fsm.process_event(VerificationEvent::DeadlineElapsed);
        assert_eq!(
            result,
            TransitionResult::Exhausted {
                attempts: 1,
                actual_state: Some(true)
            }
        );
    }

    #[test]
    fn test_match_during_retry_delay_verifies() {
        let mut fsm = VerificationMachine::new(true, 2);
        fsm.process_event(VerificationEvent::Dispatched);
        fsm.process_event(VerificationEvent::DeadlineElapsed);
        assert_eq!(fsm.state(), VerificationState::Retrying);

        let result = fsm.process_event(VerificationEvent::StatusObserved(true));
        assert_eq!(result, TransitionResult::Verified { attempts: 2 });
        assert_eq!(fsm.state(), VerificationState::Idle);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut fsm = VerificationMachine::new(true, 1);

        // Deadline before anything was sent
        let result = fsm.process_event(VerificationEvent::DeadlineElapsed);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), VerificationState::Idle);

        // Status while idle is not verification
        let result = fsm.process_event(VerificationEvent::StatusObserved(true));
        assert!(matches!(result, TransitionResult::Invalid { .. }));

        fsm.process_event(VerificationEvent::Dispatched);

        // Retry without an elapsed window
        let result = fsm.process_event(VerificationEvent::RetryDue);
        assert!(matches!(
            result,
            TransitionResult::Invalid {
                from: VerificationState::AwaitingVerification,
                event: VerificationEvent::RetryDue
            }
        ));

        // Double dispatch is the tracker's job (replace), not a transition
        let result = fsm.process_event(VerificationEvent::Dispatched);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut fsm = VerificationMachine::new(true, 0);
        fsm.process_event(VerificationEvent::Dispatched);
        fsm.process_event(VerificationEvent::DeadlineElapsed);
        assert_eq!(fsm.state(), VerificationState::Failed);

        for event in [
            VerificationEvent::Dispatched,
            VerificationEvent::StatusObserved(true),
            VerificationEvent::DeadlineElapsed,
            VerificationEvent::RetryDue,
        ] {
            assert!(matches!(
                fsm.process_event(event),
                TransitionResult::Invalid { .. }
            ));
            assert_eq!(fsm.state(), VerificationState::Failed);
        }
    }

    #[test]
    fn test_valid_transition_table() {
        use VerificationState::*;
        assert!(is_valid_transition(Idle, AwaitingVerification));
        assert!(is_valid_transition(Retrying, Idle));
        assert!(!is_valid_transition(Failed, AwaitingVerification));
        assert!(!is_valid_transition(Idle, Retrying));
    }
}
