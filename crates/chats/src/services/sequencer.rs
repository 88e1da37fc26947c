use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-chat critical sections.
///
/// A mutation holds its chat's guard from persist through publish so that
/// every recipient sees the chat's events in commit order. Different chats
/// never contend. Guards are owned, so a commit can outlive the request that
/// started it.
#[derive(Default)]
pub struct ChatSequencer {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

pub struct SequenceGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    chat_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ChatSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter(&self, chat_id: &str) -> SequenceGuard {
        let lock = self
            .locks
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        SequenceGuard {
            locks: self.locks.clone(),
            chat_id: chat_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of chats with a lock currently allocated.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map still holds the lock once nobody is waiting on it.
        self.locks
            .remove_if(&self.chat_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_chat_is_serialized() {
        let sequencer = Arc::new(ChatSequencer::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = sequencer.enter("c1").await;

        let task = {
            let sequencer = sequencer.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = sequencer.enter("c1").await;
                order.lock().unwrap().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        drop(first);
        task.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_chats_do_not_contend() {
        let sequencer = ChatSequencer::new();
        let _a = sequencer.enter("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), sequencer.enter("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_locks_are_released_when_idle() {
        let sequencer = ChatSequencer::new();
        {
            let _guard = sequencer.enter("c1").await;
            assert_eq!(sequencer.tracked(), 1);
        }
        assert_eq!(sequencer.tracked(), 0);
    }

    #[tokio::test]
    async fn test_guard_can_move_into_a_task() {
        let sequencer = ChatSequencer::new();
        let guard = sequencer.enter("c1").await;

        tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_millis(10)).await;
        })
        .await
        .unwrap();

        assert_eq!(sequencer.tracked(), 0);
        let next = tokio::time::timeout(Duration::from_millis(50), sequencer.enter("c1")).await;
        assert!(next.is_ok());
    }
}
