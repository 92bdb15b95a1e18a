//! Live clock -- a once-per-second tick that only invalidates elapsed-time
//! labels. It never triggers a fetch and keeps running while polling is paused.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Source of "now" for derived views.
#[derive(Debug, Clone, Copy, Default)]
pub enum WallClock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl WallClock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            WallClock::System => Utc::now(),
            WallClock::Fixed(t) => *t,
        }
    }
}

/// Periodic tick counter published on a `watch` channel.
#[derive(Debug)]
pub struct LiveClock {
    period: Duration,
    tick_tx: Arc<watch::Sender<u64>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for LiveClock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl LiveClock {
    pub fn new(period: Duration) -> Self {
        let (tick_tx, _) = watch::channel(0);
        Self {
            period,
            tick_tx: Arc::new(tick_tx),
            task: Mutex::new(None),
        }
    }

    /// Begin ticking. Calling again while running does nothing.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let tx = Arc::clone(&self.tick_tx);
        let period = self.period;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                tx.send_modify(|n| *n += 1);
            }
        }));
        debug!(period_ms = self.period.as_millis() as u64, "Live clock started");
    }

    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            task.abort();
            debug!("Live clock stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Ticks observed so far.
    pub fn ticks(&self) -> u64 {
        *self.tick_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tick_tx.subscribe()
    }
}

impl Drop for LiveClock {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = task.take() {
            task.abort();
        }
    }
}

/// Human-readable time since `started_at`: `"42s ago"`, `"3m 7s ago"`.
/// Missing or future start times render as `"N/A"`.
pub fn format_elapsed(started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(started_at) = started_at else {
        return "N/A".to_string();
    };
    let diff = (now - started_at).num_seconds();
    if diff < 0 {
        return "N/A".to_string();
    }
    if diff >= 60 {
        format!("{}m {}s ago", diff / 60, diff % 60)
    } else {
        format!("{}s ago", diff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_format_elapsed_seconds_and_minutes() {
        let now = Utc::now();
        let ago = |s: i64| Some(now - ChronoDuration::seconds(s));

        assert_eq!(format_elapsed(ago(5), now), "5s ago");
        assert_eq!(format_elapsed(ago(0), now), "0s ago");
        assert_eq!(format_elapsed(ago(59), now), "59s ago");
        assert_eq!(format_elapsed(ago(60), now), "1m 0s ago");
        assert_eq!(format_elapsed(ago(65), now), "1m 5s ago");
        assert_eq!(format_elapsed(ago(125), now), "2m 5s ago");
        assert_eq!(format_elapsed(ago(3725), now), "62m 5s ago");
    }

    #[test]
    fn test_format_elapsed_missing_or_future() {
        let now = Utc::now();
        assert_eq!(format_elapsed(None, now), "N/A");
        assert_eq!(
            format_elapsed(Some(now + ChronoDuration::seconds(30)), now),
            "N/A"
        );
    }

    #[test]
    fn test_fixed_wall_clock() {
        let at = Utc::now();
        assert_eq!(WallClock::Fixed(at).now(), at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let clock = LiveClock::new(Duration::from_secs(1));
        clock.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(clock.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let clock = LiveClock::new(Duration::from_secs(1));
        clock.start();
        clock.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(clock.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks() {
        let clock = LiveClock::new(Duration::from_secs(1));
        clock.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        clock.stop();
        assert!(!clock.is_running());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(clock.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_task() {
        let clock = LiveClock::new(Duration::from_secs(1));
        let mut rx = clock.subscribe();
        clock.start();
        drop(clock);
        // Sender dropped with the clock, so the receiver sees closure.
        assert!(rx.changed().await.is_err());
    }
}
