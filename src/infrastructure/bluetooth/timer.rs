//! Session Timers
//!
//! Connect timeout, reconnect backoff and polling are tokio tasks that post a
//! [`TimerEvent`] to the controller inbox. Every arm bumps a generation
//! counter so an event that was already queued when its timer got cancelled
//! is recognised as stale and dropped.

use crate::domain::models::DeviceAddress;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    ConnectTimeout,
    Reconnect,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub address: DeviceAddress,
    pub kind: TimerKind,
    pub generation: u64,
}

pub type TimerSender = mpsc::UnboundedSender<TimerEvent>;
pub type TimerReceiver = mpsc::UnboundedReceiver<TimerEvent>;

struct ArmedTimer {
    handle: JoinHandle<()>,
    generation: u64,
    repeating: bool,
}

/// The timers owned by one session.
pub struct SessionTimers {
    address: DeviceAddress,
    sender: TimerSender,
    generation: u64,
    connect_timeout: Option<ArmedTimer>,
    reconnect: Option<ArmedTimer>,
    poll: Option<ArmedTimer>,
}

impl SessionTimers {
    pub fn new(address: DeviceAddress, sender: TimerSender) -> Self {
        Self {
            address,
            sender,
            generation: 0,
            connect_timeout: None,
            reconnect: None,
            poll: None,
        }
    }

    fn slot(&mut self, kind: TimerKind) -> &mut Option<ArmedTimer> {
        match kind {
            TimerKind::ConnectTimeout => &mut self.connect_timeout,
            TimerKind::Reconnect => &mut self.reconnect,
            TimerKind::Poll => &mut self.poll,
        }
    }

    /// Arm a one-shot timer, replacing one of the same kind.
    pub fn arm_once(&mut self, kind: TimerKind, delay: Duration) {
        self.arm(kind, delay, false);
    }

    /// Arm a repeating timer whose first tick is one period from now.
    pub fn arm_repeating(&mut self, kind: TimerKind, period: Duration) {
        self.arm(kind, period, true);
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration, repeating: bool) {
        self.cancel(kind);
        self.generation += 1;

        let event = TimerEvent {
            address: self.address,
            kind,
            generation: self.generation,
        };
        let sender = self.sender.clone();
        let handle = tokio::spawn(async move {
            if repeating {
                let mut interval = time::interval_at(Instant::now() + delay, delay);
                loop {
                    interval.tick().await;
                    if sender.send(event).is_err() {
                        break;
                    }
                }
            } else {
                time::sleep(delay).await;
                let _ = sender.send(event);
            }
        });

        *self.slot(kind) = Some(ArmedTimer {
            handle,
            generation: event.generation,
            repeating,
        });
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(timer) = self.slot(kind).take() {
            timer.handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        self.cancel(TimerKind::ConnectTimeout);
        self.cancel(TimerKind::Reconnect);
        self.cancel(TimerKind::Poll);
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::ConnectTimeout => self.connect_timeout.is_some(),
            TimerKind::Reconnect => self.reconnect.is_some(),
            TimerKind::Poll => self.poll.is_some(),
        }
    }

    /// Check an event against the armed timer of its kind. A one-shot timer
    /// is disarmed by accepting its event.
    pub fn accept(&mut self, event: &TimerEvent) -> bool {
        let slot = self.slot(event.kind);
        let repeating = match slot.as_ref() {
            Some(timer) if timer.generation == event.generation => timer.repeating,
            _ => return false,
        };
        if !repeating {
            *slot = None;
        }
        true
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timers() -> (SessionTimers, TimerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionTimers::new(DeviceAddress::new([1; 6]), tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let (mut timers, mut rx) = timers();
        timers.arm_once(TimerKind::Reconnect, Duration::from_secs(2));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, TimerKind::Reconnect);
        assert!(timers.accept(&event));
        assert!(!timers.is_armed(TimerKind::Reconnect));
        assert!(!timers.accept(&event));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_makes_queued_event_stale() {
        let (mut timers, mut rx) = timers();
        timers.arm_once(TimerKind::ConnectTimeout, Duration::from_millis(10));
        let stale = rx.recv().await.unwrap();

        timers.arm_once(TimerKind::ConnectTimeout, Duration::from_millis(10));
        assert!(!timers.accept(&stale));
        let fresh = rx.recv().await.unwrap();
        assert!(timers.accept(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_until_cancelled() {
        let (mut timers, mut rx) = timers();
        timers.arm_repeating(TimerKind::Poll, Duration::from_secs(5));

        for _ in 0..3 {
            let event = rx.recv().await.unwrap();
            assert!(timers.accept(&event));
        }
        timers.cancel(TimerKind::Poll);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
