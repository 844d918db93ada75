//! Verification tracker - owns every in-flight verified command

use super::scheduler::TimerHandle;
use bytes::Bytes;
use homy_shared::state_machine::{
    is_valid_transition, TransitionResult, VerificationEvent, VerificationMachine,
};
use homy_shared::VerificationPolicy;
use std::collections::HashMap;
use std::fmt;
use tokio::time::Instant;

/// Identity of a tracked command: one slot per channel and reason
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub channel_id: String,
    pub reason: String,
}

impl CommandKey {
    pub fn new(channel_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.reason)
    }
}

/// A verified command awaiting confirmation
#[derive(Debug)]
pub struct PendingCommand {
    pub key: CommandKey,
    /// Where resends go
    pub command_topic: String,
    /// Payload resent on every attempt
    pub payload: Bytes,
    pub policy: VerificationPolicy,
    /// Verification deadline of the current attempt, `None` while retrying
    pub deadline: Option<Instant>,
    machine: VerificationMachine,
    timer: Option<TimerHandle>,
}

impl PendingCommand {
    /// Create an entry for a command that was just published
    pub fn new(
        key: CommandKey,
        command_topic: String,
        payload: Bytes,
        expected_state: bool,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            key,
            command_topic,
            payload,
            policy,
            deadline: None,
            machine: VerificationMachine::new(expected_state, policy.max_retries),
            timer: None,
        }
    }

    pub fn expected_state(&self) -> bool {
        self.machine.expected_state()
    }

    pub fn attempts(&self) -> u32 {
        self.machine.attempts()
    }

    /// Feed an event through the state machine
    pub fn apply(&mut self, event: VerificationEvent) -> TransitionResult {
        let from = self.machine.state();
        let result = self.machine.process_event(event);
        debug_assert!(
            matches!(result, TransitionResult::Invalid { .. })
                || is_valid_transition(from, self.machine.state()),
            "illegal transition {:?} -> {:?}",
            from,
            self.machine.state()
        );
        result
    }

    /// Install the single timer of this command, cancelling any previous one
    pub fn arm(&mut self, timer: TimerHandle) {
        self.timer = Some(timer);
    }

    /// Cancel the armed timer, if any
    pub fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Whether a timer firing with `generation` is the one currently armed
    pub fn is_current(&self, generation: u64) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|t| t.generation() == generation)
    }
}

/// Map from command identity to pending verification
#[derive(Debug, Default)]
pub struct VerificationTracker {
    pending: HashMap<CommandKey, PendingCommand>,
}

impl VerificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a command, returning the entry it replaced
    ///
    /// The replaced entry's timer is cancelled before it is handed back.
    pub fn insert(&mut self, command: PendingCommand) -> Option<PendingCommand> {
        let mut replaced = self.pending.insert(command.key.clone(), command);
        if let Some(old) = replaced.as_mut() {
            old.disarm();
        }
        replaced
    }

    pub fn get_mut(&mut self, key: &CommandKey) -> Option<&mut PendingCommand> {
        self.pending.get_mut(key)
    }

    /// Stop tracking a command and cancel its timer
    pub fn remove(&mut self, key: &CommandKey) -> Option<PendingCommand> {
        let mut removed = self.pending.remove(key);
        if let Some(cmd) = removed.as_mut() {
            cmd.disarm();
        }
        removed
    }

    /// Keys of all commands pending on a channel
    pub fn keys_for_channel(&self, channel_id: &str) -> Vec<CommandKey> {
        self.pending
            .keys()
            .filter(|k| k.channel_id == channel_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn count_for(&self, channel_id: &str) -> usize {
        self.pending
            .keys()
            .filter(|k| k.channel_id == channel_id)
            .count()
    }
}
