//! Timer management for the production runner.
//!
//! Each timer is a tokio task that sleeps for the configured duration and
//! then sends the matching event; setting a timer with the same id
//! replaces the previous one.

use isaac_core::{Event, TimerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

fn timer_event(id: TimerId) -> Event {
    match id {
        TimerId::Sign => Event::SignTimer,
        TimerId::Accept => Event::AcceptTimer,
    }
}

/// Manages the phase timers.
pub struct TimerManager {
    timers: HashMap<TimerId, JoinHandle<()>>,
    event_tx: mpsc::Sender<Event>,
}

impl TimerManager {
    pub fn new(event_tx: mpsc::Sender<Event>) -> Self {
        TimerManager {
            timers: HashMap::new(),
            event_tx,
        }
    }

    /// Set a timer, replacing any existing timer with the same id.
    pub fn set_timer(&mut self, id: TimerId, duration: Duration) {
        self.cancel_timer(id);

        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            trace!(?id, "timer fired");
            let _ = event_tx.send(timer_event(id)).await;
        });
        self.timers.insert(id, handle);
        debug!(?id, ?duration, "timer set");
    }

    /// Cancel a timer; a no-op when it does not exist or already fired.
    pub fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
            trace!(?id, "timer cancelled");
        }
    }

    /// Cancel everything; called during shutdown.
    pub fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timer_fires() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut timers = TimerManager::new(event_tx);
        timers.set_timer(TimerId::Sign, Duration::from_millis(10));

        let event = tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
            .await
            .expect("timeout")
            .expect("channel closed");
        assert!(matches!(event, Event::SignTimer));
    }

    #[tokio::test]
    async fn cancelled_timer_stays_silent() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut timers = TimerManager::new(event_tx);
        timers.set_timer(TimerId::Accept, Duration::from_millis(20));
        timers.cancel_timer(TimerId::Accept);

        let result = tokio::time::timeout(Duration::from_millis(80), event_rx.recv()).await;
        assert!(result.is_err(), "timer should have been cancelled");
    }

    #[tokio::test]
    async fn setting_twice_replaces_the_timer() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let mut timers = TimerManager::new(event_tx);
        timers.set_timer(TimerId::Sign, Duration::from_millis(200));
        timers.set_timer(TimerId::Sign, Duration::from_millis(10));
        assert_eq!(timers.active_count(), 1);

        let event = tokio::time::timeout(Duration::from_millis(100), event_rx.recv())
            .await
            .expect("replacement timer did not fire quickly")
            .expect("channel closed");
        assert!(matches!(event, Event::SignTimer));
    }
}
