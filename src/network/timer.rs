//! Turn Timer
//!
//! One countdown per duel. Arming spawns a task that sleeps for the turn
//! timeout and then spawns the expiry callback with the turn it was armed
//! for; the callback is responsible for ignoring a turn that already moved
//! on. Disarming aborts a countdown that has not fired yet.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

struct Armed {
    turn: u32,
    deadline_ms: i64,
    handle: JoinHandle<()>,
}

/// Per-duel turn countdown.
pub struct TurnTimer {
    duration: Duration,
    armed: Option<Armed>,
}

impl TurnTimer {
    /// Create a disarmed timer.
    pub fn new(duration: Duration) -> Self {
        Self { duration, armed: None }
    }

    /// Start counting down for `turn`.
    ///
    /// Re-arming for the turn already being counted is a no-op, so a turn
    /// never gets extra time. Arming for a different turn replaces the
    /// running countdown.
    pub fn arm<F, Fut>(&mut self, turn: u32, on_expiry: F)
    where
        F: FnOnce(u32) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.armed_turn() == Some(turn) {
            return;
        }
        self.disarm();

        let duration = self.duration;
        let deadline_ms = Utc::now().timestamp_millis()
            + i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2);
        // The callback runs detached: it usually re-arms this timer, and
        // disarming must not abort the callback itself.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            tokio::spawn(on_expiry(turn));
        });

        self.armed = Some(Armed { turn, deadline_ms, handle });
    }

    /// Stop the countdown, if any.
    pub fn disarm(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.handle.abort();
        }
    }

    /// Turn currently being counted.
    pub fn armed_turn(&self) -> Option<u32> {
        self.armed
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| a.turn)
    }

    /// Wall-clock deadline (unix millis) of the running countdown.
    pub fn deadline_ms(&self) -> Option<i64> {
        self.armed
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| a.deadline_ms)
    }
}

impl Drop for TurnTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
