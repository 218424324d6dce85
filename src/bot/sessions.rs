//! Per-user session table
//!
//! Every user gets one [`UserSlot`] behind its own async mutex. Holding the
//! lock for the whole handling of an update serialises updates of the same
//! user while different users proceed in parallel. Idle slots are dropped
//! automatically, which also expires abandoned conversations.
//!
//! The table has no size bound. A slot only leaves the table after it has
//! been idle, never while an update still holds its lock.

use super::state::UserSlot;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Session storage keyed by Telegram user id
#[derive(Clone)]
pub struct SessionTable {
    slots: Cache<i64, Arc<Mutex<UserSlot>>>,
    idle: Duration,
}

impl SessionTable {
    /// Creates a table that forgets a user after `idle` without activity
    ///
    /// # Examples
    ///
    /// ```
    /// use scoredesk::bot::sessions::SessionTable;
    /// use std::time::Duration;
    ///
    /// let sessions = SessionTable::new(Duration::from_secs(1800));
    /// assert_eq!(sessions.idle(), Duration::from_secs(1800));
    /// ```
    #[must_use]
    pub fn new(idle: Duration) -> Self {
        let slots = Cache::builder().time_to_idle(idle).build();
        Self { slots, idle }
    }

    /// Lock the slot of `user_id`, creating an empty one if needed.
    ///
    /// The returned guard must be held while the update is processed.
    pub async fn lock(&self, user_id: i64) -> OwnedMutexGuard<UserSlot> {
        let slot = self
            .slots
            .get_with(user_id, async { Arc::new(Mutex::new(UserSlot::default())) })
            .await;
        debug!("Locked session slot for user {user_id}");
        slot.lock_owned().await
    }

    /// Configured idle expiry
    #[must_use]
    pub const fn idle(&self) -> Duration {
        self.idle
    }

    /// Approximate number of tracked users
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.slots.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::state::Flow;

    #[tokio::test]
    async fn test_slot_state_persists_between_locks() {
        let sessions = SessionTable::new(Duration::from_secs(60));
        {
            let mut slot = sessions.lock(1).await;
            slot.begin(Flow::AddEntry);
        }
        let slot = sessions.lock(1).await;
        assert!(slot.conversation.is_some());
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let sessions = SessionTable::new(Duration::from_secs(60));
        let _held = sessions.lock(1).await;

        // A different user is not blocked by user 1
        let mut other = sessions.lock(2).await;
        other.pending_retry = Some("https://x".to_string());
        assert!(other.conversation.is_none());
    }

    #[tokio::test]
    async fn test_same_user_is_serialised() {
        let sessions = SessionTable::new(Duration::from_secs(60));
        let held = sessions.lock(7).await;

        let contender = sessions.clone();
        let waiter = tokio::spawn(async move {
            let slot = contender.lock(7).await;
            slot.pending_retry.clone()
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        let mut held = held;
        held.pending_retry = Some("seen".to_string());
        drop(held);

        let observed = waiter.await.expect("join");
        assert_eq!(observed.as_deref(), Some("seen"));
    }

    #[tokio::test]
    async fn test_held_slot_survives_many_other_users() {
        let sessions = SessionTable::new(Duration::from_secs(60));
        let mut held = sessions.lock(1).await;

        for user_id in 2..2_002 {
            sessions.lock(user_id).await.begin(Flow::AddEntry);
        }
        sessions.slots.run_pending_tasks().await;
        assert_eq!(sessions.entry_count(), 2_001);

        let contender = sessions.clone();
        let waiter = tokio::spawn(async move {
            let slot = contender.lock(1).await;
            slot.pending_retry.clone()
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        held.pending_retry = Some("still mine".to_string());
        drop(held);
        let observed = waiter.await.expect("join");
        assert_eq!(observed.as_deref(), Some("still mine"));
    }

    #[tokio::test]
    async fn test_idle_slots_expire() {
        let sessions = SessionTable::new(Duration::from_millis(50));
        sessions.lock(3).await.begin(Flow::DeleteEntry);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let slot = sessions.lock(3).await;
        assert!(slot.conversation.is_none());
    }
}
