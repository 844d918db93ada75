//! Retry scheduler - one-shot timers that post back into the controller loop

use super::controller::ControllerEvent;
use super::tracker::CommandKey;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::sleep;

/// What a timer stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Verification window of the current attempt
    Deadline,
    /// Pause before the next attempt
    RetryDelay,
}

/// Cancel handle of an armed timer
///
/// Dropping the handle cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    generation: u64,
    abort: AbortHandle,
}

impl TimerHandle {
    /// Generation tag carried by the timer's event
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel the timer; a no-op if it already fired
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Arms timers on behalf of the verification controller
///
/// Holds only a weak sender so pending timers never keep the controller alive.
pub struct RetryScheduler {
    events: mpsc::WeakUnboundedSender<ControllerEvent>,
    next_generation: u64,
}

impl RetryScheduler {
    pub fn new(events: mpsc::WeakUnboundedSender<ControllerEvent>) -> Self {
        Self {
            events,
            next_generation: 0,
        }
    }

    /// Arm a one-shot timer for `key`
    ///
    /// When it fires, a `TimerFired` event tagged with a fresh generation is
    /// posted to the controller; the controller discards it unless the same
    /// generation is still armed on the entry.
    pub fn arm(&mut self, key: CommandKey, kind: TimerKind, delay: Duration) -> TimerHandle {
        self.next_generation += 1;
        let generation = self.next_generation;
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(events) = events.upgrade() {
                let _ = events.send(ControllerEvent::TimerFired {
                    key,
                    generation,
                    kind,
                });
            }
        });

        TimerHandle {
            generation,
            abort: task.abort_handle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RetryScheduler::new(tx.downgrade());
        let key = CommandKey::new("bath1Light", "toggle_on");

        let start = tokio::time::Instant::now();
        let _timer = scheduler.arm(key.clone(), TimerKind::Deadline, Duration::from_millis(5000));

        match rx.recv().await {
            Some(ControllerEvent::TimerFired {
                key: fired,
                generation,
                kind,
            }) => {
                assert_eq!(fired, key);
                assert_eq!(generation, 1);
                assert_eq!(kind, TimerKind::Deadline);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(5000));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generations_increase() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = RetryScheduler::new(tx.downgrade());
        let key = CommandKey::new("bath1Light", "toggle_on");

        let first = scheduler.arm(key.clone(), TimerKind::Deadline, Duration::from_secs(5));
        let second = scheduler.arm(key, TimerKind::RetryDelay, Duration::from_secs(1));
        assert!(second.generation() > first.generation());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = RetryScheduler::new(tx.downgrade());

        let timer = scheduler.arm(
            CommandKey::new("bath1Light", "toggle_on"),
            TimerKind::Deadline,
            Duration::from_millis(100),
        );
        drop(timer);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
        drop(tx);
    }
}
