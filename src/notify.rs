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

//! User-scoped event delivery.
//!
//! Delivery is at-most-once and never blocks the sender: events for users
//! without a live subscriber are dropped.

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Event name used for upload progress snapshots.
pub const UPLOAD_PROGRESS: &str = "UploadProgress";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: String,
    pub payload: Value,
}

pub trait Notifier: Send + Sync + 'static {
    fn send(&self, user: &str, event: &str, payload: Value);
}

/// Per-user registry of broadcast channels. Events of one user are delivered
/// in send order to every subscriber of that user.
#[derive(Debug)]
pub struct ChannelNotifier {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Notification>>>,
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, user: &str) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.write();
        channels
            .entry(user.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of users with at least one live subscriber.
    pub fn connected_users(&self) -> usize {
        self.channels
            .read()
            .values()
            .filter(|tx| tx.receiver_count() > 0)
            .count()
    }
}

impl Notifier for ChannelNotifier {
    fn send(&self, user: &str, event: &str, payload: Value) {
        let delivered = {
            let channels = self.channels.read();
            match channels.get(user) {
                Some(tx) => tx
                    .send(Notification {
                        event: event.to_string(),
                        payload,
                    })
                    .is_ok(),
                None => return,
            }
        };
        if !delivered {
            // every receiver is gone
            let mut channels = self.channels.write();
            if channels.get(user).is_some_and(|tx| tx.receiver_count() == 0) {
                channels.remove(user);
            }
        }
    }
}
