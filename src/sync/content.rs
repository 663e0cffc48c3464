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

use crate::sync::SyncError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Cursor;
use tokio::io::AsyncRead;

/// One file's content as yielded by a [`ContentProvider`].
pub struct FileContent<'a> {
    /// Logical project path the content belongs to.
    pub name: String,
    /// Name the transport used for the payload, e.g. the multipart file name.
    pub transport_name: Option<String>,
    pub reader: Box<dyn AsyncRead + Send + Unpin + 'a>,
}

impl<'a> FileContent<'a> {
    pub fn new(name: impl Into<String>, reader: impl AsyncRead + Send + Unpin + 'a) -> Self {
        Self {
            name: name.into(),
            transport_name: None,
            reader: Box::new(reader),
        }
    }

    pub fn with_transport_name(mut self, transport_name: impl Into<String>) -> Self {
        self.transport_name = Some(transport_name.into());
        self
    }

    /// The payload is gzip encoded for transport when the transport name
    /// carries a `.gz` suffix that the logical name lacks.
    pub fn is_transport_compressed(&self) -> bool {
        self.transport_name
            .as_deref()
            .is_some_and(|t| t.ends_with(".gz") && !self.name.ends_with(".gz"))
    }
}

/// Pull-based source of upload content. `Ok(None)` ends the sequence.
#[async_trait]
pub trait ContentProvider: Send {
    async fn next_file<'a>(&'a mut self) -> Result<Option<FileContent<'a>>, SyncError>;
}

/// Provider for removal-only change sets.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContent;

#[async_trait]
impl ContentProvider for NoContent {
    async fn next_file<'a>(&'a mut self) -> Result<Option<FileContent<'a>>, SyncError> {
        Ok(None)
    }
}

/// Provider over in-memory payloads, yielded in insertion order.
#[derive(Debug, Default, Clone)]
pub struct BufferedContent {
    files: VecDeque<(String, Option<String>, Bytes)>,
}

impl BufferedContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, data: impl Into<Bytes>) -> &mut Self {
        self.files.push_back((name.into(), None, data.into()));
        self
    }

    pub fn push_encoded(
        &mut self,
        name: impl Into<String>,
        transport_name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> &mut Self {
        self.files
            .push_back((name.into(), Some(transport_name.into()), data.into()));
        self
    }
}

#[async_trait]
impl ContentProvider for BufferedContent {
    async fn next_file<'a>(&'a mut self) -> Result<Option<FileContent<'a>>, SyncError> {
        Ok(self.files.pop_front().map(|(name, transport_name, data)| {
            let content = FileContent::new(name, Cursor::new(data));
            match transport_name {
                Some(t) => content.with_transport_name(t),
                None => content,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn transport_compression_detection() {
        let c = FileContent::new("data/a.geojson", &b""[..]).with_transport_name("a.geojson.gz");
        assert!(c.is_transport_compressed());

        let c = FileContent::new("backup.tar.gz", &b""[..]).with_transport_name("backup.tar.gz");
        assert!(!c.is_transport_compressed());

        let c = FileContent::new("data/a.geojson", &b""[..]);
        assert!(!c.is_transport_compressed());
    }

    #[tokio::test]
    async fn buffered_content_yields_in_order() {
        let mut provider = BufferedContent::new();
        provider.push("a.txt", "A").push("b.txt", "BB");

        let mut names = Vec::new();
        while let Some(mut file) = provider.next_file().await.unwrap() {
            let mut data = Vec::new();
            file.reader.read_to_end(&mut data).await.unwrap();
            names.push((file.name, data.len()));
        }
        assert_eq!(names, vec![("a.txt".to_string(), 1), ("b.txt".to_string(), 2)]);
        assert!(NoContent.next_file().await.unwrap().is_none());
    }
}
