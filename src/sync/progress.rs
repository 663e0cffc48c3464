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

//! Upload progress reporting.
//!
//! Every content stream is wrapped in a [`ProgressReader`] that counts bytes
//! and pushes [`ProgressEvent`]s into a channel. A single [`ProgressReporter`]
//! task per upload folds those events into a snapshot and forwards it to the
//! notifier, plus one final snapshot once the channel closes. Intermediate
//! snapshots share a [`UserThrottle`], so concurrent uploads of one user
//! still notify at most once per interval.

use crate::notify::{Notifier, UPLOAD_PROGRESS};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub field: String,
    pub bytes: u64,
}

/// Byte-counting wrapper around a content stream.
///
/// Reports after every `step` bytes and once at end of stream.
pub struct ProgressReader<R> {
    inner: R,
    field: String,
    step: u64,
    read: u64,
    reported: u64,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

impl<R> ProgressReader<R> {
    pub fn new(
        inner: R,
        field: impl Into<String>,
        step: u64,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Self {
        Self {
            inner,
            field: field.into(),
            step: step.max(1),
            read: 0,
            reported: 0,
            events,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    fn report(&mut self) {
        // a closed channel only means nobody listens any more
        let _ = self.events.send(ProgressEvent {
            field: self.field.clone(),
            bytes: self.read,
        });
        self.reported = self.read;
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let had_room = buf.remaining() > 0;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        let n = (buf.filled().len() - before) as u64;
        this.read += n;

        let eof = n == 0 && had_room;
        if eof || this.read - this.reported >= this.step {
            this.report();
        }
        Poll::Ready(Ok(()))
    }
}

/// Last progress notification per user, shared by every upload.
#[derive(Debug)]
pub struct UserThrottle {
    interval: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl UserThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Claims the user's slot if the interval has passed since the last
    /// notification.
    pub fn try_acquire(&self, user: &str) -> bool {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();
        match last_sent.get(user) {
            Some(at) if now.duration_since(*at) < self.interval => false,
            _ => {
                last_sent.insert(user.to_string(), now);
                true
            }
        }
    }

    /// Records a notification that bypassed the throttle.
    pub fn record(&self, user: &str) {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();
        let interval = self.interval;
        last_sent.retain(|_, at| now.duration_since(*at) < interval);
        last_sent.insert(user.to_string(), now);
    }
}

/// Folds progress events of one upload into snapshots for one user.
pub struct ProgressReporter {
    user: String,
    notifier: Arc<dyn Notifier>,
    throttle: Arc<UserThrottle>,
    snapshot: BTreeMap<String, u64>,
}

impl ProgressReporter {
    pub fn new(
        user: impl Into<String>,
        notifier: Arc<dyn Notifier>,
        throttle: Arc<UserThrottle>,
    ) -> Self {
        Self {
            user: user.into(),
            notifier,
            throttle,
            snapshot: BTreeMap::new(),
        }
    }

    /// Run until every sender of `events` is dropped, then emit the final
    /// snapshot.
    pub fn spawn(self, events: mpsc::UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
        while let Some(event) = events.recv().await {
            let entry = self.snapshot.entry(event.field).or_insert(0);
            *entry = (*entry).max(event.bytes);
            if self.throttle.try_acquire(&self.user) {
                self.emit();
            }
        }
        self.throttle.record(&self.user);
        self.emit();
    }

    fn emit(&self) {
        let payload = serde_json::to_value(&self.snapshot).unwrap_or_default();
        self.notifier.send(&self.user, UPLOAD_PROGRESS, payload);
    }
}
