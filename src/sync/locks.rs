// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::storage::ProjectKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed registry of per-project exclusive scopes.
///
/// Entries are held weakly: a slot lives as long as some task holds or waits
/// for its guard, and is pruned afterwards.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    slots: Mutex<HashMap<ProjectKey, Weak<AsyncMutex<()>>>>,
}

pub type ProjectGuard = OwnedMutexGuard<()>;

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &ProjectKey) -> ProjectGuard {
        let slot = {
            let mut slots = self.slots.lock();
            slots.retain(|_, slot| slot.strong_count() > 0);
            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.clone(), Arc::downgrade(&slot));
                    slot
                }
            }
        };
        slot.lock_owned().await
    }

    /// Number of projects currently locked or awaited.
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> ProjectKey {
        ProjectKey::new("alice", name).unwrap()
    }

    #[tokio::test]
    async fn same_project_is_exclusive() {
        let locks = Arc::new(ProjectLocks::new());
        let guard = locks.lock(&key("roads")).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&key("roads")).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_projects_do_not_contend() {
        let locks = ProjectLocks::new();
        let _a = locks.lock(&key("roads")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(&key("rivers"))).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }
}
