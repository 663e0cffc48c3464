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

//! On-disk file manifest of a project.
//!
//! The manifest is a JSON document stored at `<project>/.meta/files.json`
//! listing every file of the project with its size and modification time.

use crate::storage::META_DIR;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const MANIFEST_FILE: &str = "files.json";

/// One file of a project. `path` is relative to the project directory and
/// uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(default)]
    pub size: u64,
    /// Last modification, unix seconds. Zero when the client did not declare one.
    #[serde(default)]
    pub mtime: i64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            path: path.into(),
            size,
            mtime,
        }
    }
}

/// Files of a project, kept sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.position(path).ok().map(|idx| &self.files[idx])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Insert or replace the entry for `entry.path`.
    pub fn upsert(&mut self, entry: FileEntry) {
        match self.position(&entry.path) {
            Ok(idx) => self.files[idx] = entry,
            Err(idx) => self.files.insert(idx, entry),
        }
    }

    /// Remove `path` and, when it names a directory, every entry below it.
    /// Returns the number of entries removed.
    pub fn remove(&mut self, path: &str) -> usize {
        let prefix = format!("{path}/");
        let before = self.files.len();
        self.files
            .retain(|f| f.path != path && !f.path.starts_with(&prefix));
        before - self.files.len()
    }

    fn position(&self, path: &str) -> Result<usize, usize> {
        self.files.binary_search_by(|f| f.path.as_str().cmp(path))
    }

    fn normalize(&mut self) {
        self.files.sort_by(|a, b| a.path.cmp(&b.path));
        self.files.dedup_by(|a, b| a.path == b.path);
    }
}

/// Reads and writes the manifest file of a project directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestStore;

impl ManifestStore {
    /// Load the manifest; a project without one has no files yet.
    pub async fn load(project_dir: &Path) -> io::Result<Manifest> {
        let mut manifest: Manifest = load_meta_json(project_dir, MANIFEST_FILE).await?;
        manifest.normalize();
        Ok(manifest)
    }

    pub async fn save(project_dir: &Path, manifest: &Manifest) -> io::Result<()> {
        save_meta_json(project_dir, MANIFEST_FILE, manifest).await
    }
}

/// Read a JSON document from the project's metadata directory; a missing
/// document reads as the default value.
pub(crate) async fn load_meta_json<T>(project_dir: &Path, file_name: &str) -> io::Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = project_dir.join(META_DIR).join(file_name);
    let raw = match fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Replace a metadata document through a temporary sibling and a rename, so
/// readers never observe a half-written document.
pub(crate) async fn save_meta_json<T: Serialize>(
    project_dir: &Path,
    file_name: &str,
    value: &T,
) -> io::Result<()> {
    let meta_dir = project_dir.join(META_DIR);
    fs::create_dir_all(&meta_dir).await?;

    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = meta_dir.join(format!(".{file_name}.{}", uuid::Uuid::new_v4()));
    let mut file = fs::File::create(&tmp).await?;
    if let Err(e) = write_all_synced(&mut file, &data).await {
        drop(file);
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    drop(file);
    if let Err(e) = fs::rename(&tmp, meta_dir.join(file_name)).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

async fn write_all_synced(file: &mut fs::File, data: &[u8]) -> io::Result<()> {
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}
