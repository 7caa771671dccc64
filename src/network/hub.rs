//! Notification Hub
//!
//! Per-duel fan-out of resolutions. Blocking callers park a one-shot waiter
//! for their side; streaming clients hold a broadcast subscription that is
//! scoped to their role when read.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::game::moves::Side;
use crate::network::protocol::{MatchView, SpectatorView};

/// Everything any audience needs after one change to a duel.
#[derive(Debug, Clone)]
pub struct DuelUpdate {
    /// Side A's view.
    pub a: MatchView,
    /// Side B's view.
    pub b: MatchView,
    /// Neutral view.
    pub spectator: SpectatorView,
}

impl DuelUpdate {
    /// View for a participant.
    pub fn for_side(&self, side: Side) -> &MatchView {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }
}

/// Who a subscription is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// A participant, seeing their own score first.
    Participant(Side),
    /// A spectator.
    Spectator,
}

/// A view scoped to one audience.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedView {
    /// Participant view.
    Participant(MatchView),
    /// Spectator view.
    Spectator(SpectatorView),
}

/// Waiters and subscribers of one duel.
pub struct NotificationHub {
    waiters: BTreeMap<Side, oneshot::Sender<MatchView>>,
    updates: broadcast::Sender<Arc<DuelUpdate>>,
}

impl NotificationHub {
    /// Create a hub whose subscribers may lag by up to `capacity` updates.
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            waiters: BTreeMap::new(),
            updates,
        }
    }

    /// Park a waiter for the next resolution.
    ///
    /// A side has at most one waiter; registering again replaces the old
    /// one, whose receiver then sees the channel closed.
    pub fn register_waiter(&mut self, side: Side) -> oneshot::Receiver<MatchView> {
        let (tx, rx) = oneshot::channel();
        if self.waiters.insert(side, tx).is_some() {
            debug!("Replaced waiter for side {}", side);
        }
        rx
    }

    /// Number of parked waiters.
    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Subscribe to every future update.
    pub fn subscribe(&self, audience: Audience) -> Subscription {
        Subscription {
            audience,
            rx: self.updates.subscribe(),
        }
    }

    /// Wake every waiter with its side's view and broadcast the update.
    ///
    /// Returns the number of waiters that were still listening.
    pub fn publish(&mut self, update: DuelUpdate) -> usize {
        let mut woken = 0;
        for (side, tx) in std::mem::take(&mut self.waiters) {
            if tx.send(update.for_side(side).clone()).is_ok() {
                woken += 1;
            }
        }
        // No subscribers is fine
        let _ = self.updates.send(Arc::new(update));
        woken
    }

    /// Drop every parked waiter without an answer.
    pub fn drop_waiters(&mut self) -> usize {
        let dropped = self.waiters.len();
        self.waiters.clear();
        dropped
    }
}

/// A role-scoped stream of duel updates.
pub struct Subscription {
    audience: Audience,
    rx: broadcast::Receiver<Arc<DuelUpdate>>,
}

impl Subscription {
    /// Next update, or `None` once the duel is gone.
    ///
    /// A subscriber that falls behind skips the updates it missed.
    pub async fn next(&mut self) -> Option<ScopedView> {
        loop {
            match self.rx.recv().await {
                Ok(update) => {
                    return Some(match self.audience {
                        Audience::Participant(side) => {
                            ScopedView::Participant(update.for_side(side).clone())
                        }
                        Audience::Spectator => ScopedView::Spectator(update.spectator.clone()),
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
