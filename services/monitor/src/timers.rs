//! Cancellable periodic timers.
//!
//! A [`TimerSlot`] holds at most one running timer. Scheduling into an
//! occupied slot cancels the old timer first, and cancelling aborts the task
//! rather than leaving it to tick into the void.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

pub struct TimerSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Run `tick` every `period`, first after one full period. Replaces any
    /// timer already in this slot. Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(mut slot) = self.handle.lock() else {
            return;
        };
        if let Some(old) = slot.take() {
            old.abort();
        }
        let start = Instant::now() + period;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        *slot = Some(task);
        debug!(timer = self.name, ?period, "timer scheduled");
    }

    /// Stop the timer. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        let task = self.handle.lock().ok().and_then(|mut slot| slot.take());
        match task {
            Some(task) => {
                task.abort();
                debug!(timer = self.name, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(counter: &Arc<AtomicU32>) -> impl FnMut() -> std::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn advance(d: Duration) {
        tokio::time::advance(d).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period_until_cancelled() {
        let slot = TimerSlot::new("test");
        let ticks = Arc::new(AtomicU32::new(0));
        slot.schedule(Duration::from_secs(1), counting(&ticks));
        assert!(slot.is_active());

        advance(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            advance(Duration::from_secs(1)).await;
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        assert!(slot.cancel());
        assert!(!slot.is_active());
        advance(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let slot = TimerSlot::new("test");
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        slot.schedule(Duration::from_secs(1), counting(&first));
        slot.schedule(Duration::from_secs(1), counting(&second));

        advance(Duration::from_millis(1500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_on_empty_slot_is_noop() {
        let slot = TimerSlot::new("test");
        assert!(!slot.cancel());
        assert!(!slot.cancel());
        assert!(!slot.is_active());
    }
}
