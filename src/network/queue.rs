//! Matchmaking Queue
//!
//! FIFO of callers waiting for an opponent. Pairing skips entries with the
//! joiner's own `(display_name, origin_key)`, and entries older than the
//! queue timeout are evicted before every scan. The queue owns no lock and
//! touches no store; the engine does both around it.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::network::protocol::MatchView;
use crate::persist::QueueRecord;

/// What a blocked joiner is woken with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueNotice {
    /// Paired; the view is for the waiting entry's side.
    Matched(MatchView),
    /// Evicted as stale.
    Expired,
}

/// One caller waiting for an opponent.
#[derive(Debug)]
pub struct QueueEntry {
    /// Token handed to the caller; becomes its participant token.
    pub token: String,
    /// Requested display name.
    pub display_name: String,
    /// Network origin of the request.
    pub origin_key: String,
    /// When the entry joined.
    pub enqueued_at: DateTime<Utc>,
    /// Blocked caller, if any.
    pub waiter: Option<oneshot::Sender<QueueNotice>>,
}

impl QueueEntry {
    /// New entry joining now.
    pub fn new(token: String, display_name: String, origin_key: String) -> Self {
        Self {
            token,
            display_name,
            origin_key,
            enqueued_at: Utc::now(),
            waiter: None,
        }
    }

    /// Rebuild from a persisted row. Restored entries have no waiter.
    pub fn from_record(token: String, record: QueueRecord) -> Self {
        Self {
            token,
            display_name: record.display_name,
            origin_key: record.origin_key,
            enqueued_at: record.enqueued_at,
            waiter: None,
        }
    }

    /// Row to persist.
    pub fn record(&self) -> QueueRecord {
        QueueRecord {
            display_name: self.display_name.clone(),
            origin_key: self.origin_key.clone(),
            enqueued_at: self.enqueued_at,
        }
    }

    /// Would pairing with this caller be a self-match?
    pub fn same_caller(&self, display_name: &str, origin_key: &str) -> bool {
        self.display_name == display_name && self.origin_key == origin_key
    }

    /// Wake the blocked caller, if still listening.
    pub fn notify(&mut self, notice: QueueNotice) -> bool {
        self.waiter
            .take()
            .map(|tx| tx.send(notice).is_ok())
            .unwrap_or(false)
    }
}

/// Is an entry enqueued at `enqueued_at` stale at `now`?
pub fn is_stale(enqueued_at: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    let age = now.signed_duration_since(enqueued_at);
    match chrono::Duration::from_std(timeout) {
        Ok(limit) => age >= limit,
        Err(_) => false,
    }
}

/// The waiting line.
#[derive(Debug)]
pub struct MatchQueue {
    entries: VecDeque<QueueEntry>,
    timeout: Duration,
}

impl MatchQueue {
    /// Empty queue whose entries go stale after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            timeout,
        }
    }

    /// Entries waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nobody waiting?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append at the tail.
    pub fn push(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    /// Put back restored entries, keeping enqueue order.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = QueueEntry>) {
        self.entries.extend(entries);
        self.entries
            .make_contiguous()
            .sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.token.cmp(&b.token)));
    }

    /// Remove every stale entry, oldest first.
    pub fn purge_stale(&mut self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        let timeout = self.timeout;
        let (stale, fresh): (Vec<_>, Vec<_>) = self
            .entries
            .drain(..)
            .partition(|e| is_stale(e.enqueued_at, now, timeout));
        self.entries = fresh.into();
        stale
    }

    /// Take the first entry that is not the same caller.
    pub fn take_partner(&mut self, display_name: &str, origin_key: &str) -> Option<QueueEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| !e.same_caller(display_name, origin_key))?;
        self.entries.remove(idx)
    }

    /// Remove an entry by token.
    pub fn remove(&mut self, token: &str) -> Option<QueueEntry> {
        let idx = self.entries.iter().position(|e| e.token == token)?;
        self.entries.remove(idx)
    }

    /// 1-based position of a token.
    pub fn position(&self, token: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.token == token).map(|i| i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn entry(token: &str, name: &str, origin: &str) -> QueueEntry {
        QueueEntry::new(token.into(), name.into(), origin.into())
    }

    #[test]
    fn test_fifo_pairing() {
        let mut q = MatchQueue::new(Duration::from_secs(60));
        q.push(entry("t1", "ada", "o1"));
        q.push(entry("t2", "bo", "o2"));

        let partner = q.take_partner("cy", "o3").unwrap();
        assert_eq!(partner.token, "t1");
        assert_eq!(q.position("t2"), Some(1));
    }

    #[test]
    fn test_skips_self() {
        let mut q = MatchQueue::new(Duration::from_secs(60));
        q.push(entry("t1", "ada", "o1"));
        assert!(q.take_partner("ada", "o1").is_none());

        // Same name from another origin is a different caller
        assert_eq!(q.take_partner("ada", "o2").unwrap().token, "t1");
    }

    #[test]
    fn test_skips_self_but_pairs_next() {
        let mut q = MatchQueue::new(Duration::from_secs(60));
        q.push(entry("t1", "ada", "o1"));
        q.push(entry("t2", "bo", "o2"));
        assert_eq!(q.take_partner("ada", "o1").unwrap().token, "t2");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_purge_stale() {
        let mut q = MatchQueue::new(Duration::from_secs(120));
        let now = Utc::now();
        let mut old = entry("old", "ada", "o1");
        old.enqueued_at = now - chrono::Duration::seconds(121);
        q.push(old);
        q.push(entry("new", "bo", "o2"));

        let stale = q.purge_stale(now);
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].token, "old");
        assert_eq!(q.position("new"), Some(1));
    }

    #[test]
    fn test_zero_timeout_is_always_stale() {
        let now = Utc::now();
        assert!(is_stale(now, now, Duration::ZERO));
        assert!(!is_stale(now, now, Duration::from_secs(1)));
    }

    #[test]
    fn test_restore_sorts_by_enqueue_time() {
        let mut q = MatchQueue::new(Duration::from_secs(60));
        let now = Utc::now();
        let mut late = entry("late", "ada", "o1");
        late.enqueued_at = now;
        let mut early = entry("early", "bo", "o2");
        early.enqueued_at = now - chrono::Duration::seconds(5);
        q.restore(vec![late, early]);
        assert_eq!(q.position("early"), Some(1));
        assert_eq!(q.position("late"), Some(2));
    }

    #[tokio::test]
    async fn test_notify_wakes_waiter_once() {
        let mut e = entry("t1", "ada", "o1");
        let (tx, rx) = oneshot::channel();
        e.waiter = Some(tx);
        assert!(e.notify(QueueNotice::Expired));
        assert!(!e.notify(QueueNotice::Expired));
        assert_eq!(rx.await.unwrap(), QueueNotice::Expired);
    }

    #[test]
    fn test_remove() {
        let mut q = MatchQueue::new(Duration::from_secs(60));
        q.push(entry("t1", "ada", "o1"));
        assert!(q.remove("t1").is_some());
        assert!(q.remove("t1").is_none());
        assert!(q.is_empty());
    }

    proptest! {
        #[test]
        fn test_never_self_matches(joins in proptest::collection::vec((0u8..3, 0u8..2), 1..40)) {
            let mut q = MatchQueue::new(Duration::from_secs(600));
            for (i, (name, origin)) in joins.into_iter().enumerate() {
                let name = format!("n{}", name);
                let origin = format!("o{}", origin);
                match q.take_partner(&name, &origin) {
                    Some(partner) => {
                        prop_assert!(!partner.same_caller(&name, &origin));
                    }
                    None => {
                        prop_assert!(q.entries.iter().all(|e| e.same_caller(&name, &origin)));
                        q.push(entry(&format!("t{}", i), &name, &origin));
                    }
                }
            }
        }
    }
}
