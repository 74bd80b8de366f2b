use std::collections::HashSet;

use shared::{domain::UserId, protocol::PresenceUpdate};
use tokio::sync::RwLock;

/// Online/offline state of peers, last write wins.
///
/// Snapshots replace the whole set; deltas mutate one id. Both are
/// applied strictly in arrival order on the single connection, so a
/// delta received after a snapshot supersedes it for that user.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: RwLock<HashSet<UserId>>,
}

impl PresenceTracker {
    pub async fn online(&self) -> HashSet<UserId> {
        self.online.read().await.clone()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.online.read().await.contains(user_id)
    }

    pub(crate) async fn apply_snapshot(&self, updates: Vec<PresenceUpdate>) {
        let mut guard = self.online.write().await;
        guard.clear();
        guard.extend(
            updates
                .into_iter()
                .filter(|u| u.online)
                .map(|u| u.user_id),
        );
    }

    pub(crate) async fn apply_delta(&self, user_id: UserId, online: bool) {
        let mut guard = self.online.write().await;
        if online {
            guard.insert(user_id);
        } else {
            guard.remove(&user_id);
        }
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
