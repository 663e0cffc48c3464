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

//! Project file synchronization.
//!
//! [`SyncEngine::apply_changes`] applies a [`FileChangeSet`] to a project
//! directory:
//!
//! 1. every declared path is validated before anything touches the disk;
//! 2. the project is locked for the rest of the call;
//! 3. content is streamed from the [`ContentProvider`] into a staging
//!    directory on the same volume, gunzipped if it was compressed for
//!    transport, then renamed into place;
//! 4. removals are applied and the manifest is rewritten.
//!
//! A failed file stops the change set. Files committed before the failure
//! stay committed and are recorded in the manifest.
//!
//! Script modules ([`scripts`]) are change sets under `web/components/` plus
//! a registry entry, both written under the same project lock.

pub mod content;
pub mod locks;
pub mod paths;
pub mod progress;
pub mod scripts;

pub use content::{BufferedContent, ContentProvider, FileContent, NoContent};
pub use locks::ProjectLocks;
pub use scripts::{ScriptModule, ScriptUpload, Scripts};

use crate::notify::Notifier;
use crate::observability::metrics;
use crate::storage::{FileEntry, Manifest, ManifestStore, ProjectKey};
use progress::{ProgressEvent, ProgressReader, ProgressReporter, UserThrottle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

/// Staging area below the projects root. Owners cannot start with `.`, so it
/// never collides with a project.
const STAGING_DIR: &str = ".staging";
const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("failed to read upload content: {0}")]
    ContentRead(String),
    #[error("{0}")]
    InvalidScript(String),
    #[error("upload exceeds the size limit of {limit} bytes")]
    SizeLimitExceeded { limit: u64 },
    #[error("internal sync error: {0}")]
    Io(String),
}

impl SyncError {
    fn io(context: &str, e: io::Error) -> Self {
        SyncError::Io(format!("{context}: {e}"))
    }

    fn label(&self) -> &'static str {
        match self {
            SyncError::ProjectNotFound(_) => "not_found",
            SyncError::InvalidPath(_) => "invalid_path",
            SyncError::ContentRead(_) => "content_read",
            SyncError::InvalidScript(_) => "invalid_script",
            SyncError::SizeLimitExceeded { .. } => "size_limit",
            SyncError::Io(_) => "io",
        }
    }
}

/// Files to write (content supplied separately) and paths to delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileChangeSet {
    #[serde(default, alias = "files")]
    pub updates: Vec<FileEntry>,
    #[serde(default, alias = "removes")]
    pub removals: Vec<String>,
}

impl FileChangeSet {
    pub fn removals(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            updates: Vec::new(),
            removals: paths.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between two progress notifications to one user.
    pub progress_interval: Duration,
    /// Bytes a single stream reads between two progress events.
    pub progress_step: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_millis(500),
            progress_step: 32 * 1024,
        }
    }
}

/// Where upload progress goes.
#[derive(Clone)]
pub struct ProgressTarget {
    pub user: String,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Clone, Default)]
pub struct ApplyOptions {
    /// Aggregate byte cap; `None` for privileged callers.
    pub size_limit: Option<u64>,
    pub progress: Option<ProgressTarget>,
}

/// Validated change set.
struct ChangePlan {
    updates: HashMap<String, FileEntry>,
    removals: Vec<String>,
}

impl ChangePlan {
    fn new(changes: FileChangeSet) -> Result<Self, SyncError> {
        let mut updates = HashMap::with_capacity(changes.updates.len());
        for entry in changes.updates {
            let path = paths::normalize(&entry.path)?;
            updates.insert(path.clone(), FileEntry { path, ..entry });
        }
        let mut removals = Vec::with_capacity(changes.removals.len());
        for raw in &changes.removals {
            let path = paths::normalize(raw)?;
            if !removals.contains(&path) {
                removals.push(path);
            }
        }
        Ok(Self { updates, removals })
    }

    fn check_declared_size(&self, key: &ProjectKey, limit: Option<u64>) -> Result<(), SyncError> {
        match limit {
            Some(limit) if self.declared_size() > limit => {
                tracing::warn!(project = %key, declared = self.declared_size(), limit, "upload rejected: declared size over limit");
                Err(SyncError::SizeLimitExceeded { limit })
            }
            _ => Ok(()),
        }
    }

    /// Saturates, so absurd declarations still trip the cap.
    fn declared_size(&self) -> u64 {
        self.updates
            .values()
            .fold(0u64, |total, e| total.saturating_add(e.size))
    }
}

struct ByteBudget {
    limit: Option<u64>,
    used: u64,
}

impl ByteBudget {
    /// Bytes left before the cap trips; `None` when uncapped.
    fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    fn consume(&mut self, n: u64) -> Result<(), SyncError> {
        self.used = self.used.saturating_add(n);
        match self.limit {
            Some(limit) if self.used > limit => Err(SyncError::SizeLimitExceeded { limit }),
            _ => Ok(()),
        }
    }
}

/// Applies change sets to project directories under one projects root.
#[derive(Debug)]
pub struct SyncEngine {
    projects_root: PathBuf,
    config: SyncConfig,
    locks: ProjectLocks,
    throttle: Arc<UserThrottle>,
}

impl SyncEngine {
    pub fn new(projects_root: impl Into<PathBuf>, config: SyncConfig) -> Self {
        Self {
            projects_root: projects_root.into(),
            throttle: Arc::new(UserThrottle::new(config.progress_interval)),
            config,
            locks: ProjectLocks::new(),
        }
    }

    pub fn project_dir(&self, key: &ProjectKey) -> PathBuf {
        self.projects_root.join(&key.owner).join(&key.name)
    }

    pub fn locks(&self) -> &ProjectLocks {
        &self.locks
    }

    async fn existing_project_dir(&self, key: &ProjectKey) -> Result<PathBuf, SyncError> {
        let dir = self.project_dir(key);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(SyncError::ProjectNotFound(key.to_string())),
        }
    }

    /// Current manifest of a project.
    pub async fn manifest(&self, key: &ProjectKey) -> Result<Manifest, SyncError> {
        let dir = self.existing_project_dir(key).await?;
        ManifestStore::load(&dir)
            .await
            .map_err(|e| SyncError::io("load manifest", e))
    }

    /// Apply `changes` to the project and return the rewritten manifest.
    pub async fn apply_changes(
        &self,
        key: &ProjectKey,
        changes: FileChangeSet,
        content: &mut dyn ContentProvider,
        options: ApplyOptions,
    ) -> Result<Manifest, SyncError> {
        let started = Instant::now();
        let result = self.apply_inner(key, changes, content, options).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::record_changeset(outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn apply_inner(
        &self,
        key: &ProjectKey,
        changes: FileChangeSet,
        content: &mut dyn ContentProvider,
        options: ApplyOptions,
    ) -> Result<Manifest, SyncError> {
        let project_dir = self.existing_project_dir(key).await?;
        let plan = ChangePlan::new(changes)?;
        plan.check_declared_size(key, options.size_limit)?;

        let wait = Instant::now();
        let _guard = self.locks.lock(key).await;
        metrics::record_lock_wait("project", wait.elapsed().as_secs_f64());
        self.apply_plan(key, &project_dir, plan, content, options).await
    }

    /// Installs a script module: writes its components and registers it.
    /// Returns the updated registry.
    pub async fn install_script(
        &self,
        key: &ProjectKey,
        upload: ScriptUpload,
        content: &mut dyn ContentProvider,
        options: ApplyOptions,
    ) -> Result<Scripts, SyncError> {
        let project_dir = self.existing_project_dir(key).await?;
        let plan = ChangePlan::new(upload.change_set()?)?;

        let wait = Instant::now();
        let _guard = self.locks.lock(key).await;
        metrics::record_lock_wait("project", wait.elapsed().as_secs_f64());
        let mut components = scripts::ComponentContent::new(content);
        self.apply_plan(key, &project_dir, plan, &mut components, options)
            .await?;

        let mut registry = scripts::load(&project_dir)
            .await
            .map_err(|e| SyncError::io("load scripts", e))?;
        let (module, entry) = upload.into_entry();
        tracing::info!(project = %key, module = %module, "script module installed");
        registry.insert(module, entry);
        scripts::save(&project_dir, &registry)
            .await
            .map_err(|e| SyncError::io("save scripts", e))?;
        Ok(registry)
    }

    /// Unregisters script modules and removes the component files no other
    /// module uses. Unknown names are ignored.
    pub async fn remove_scripts(
        &self,
        key: &ProjectKey,
        modules: &[String],
    ) -> Result<Scripts, SyncError> {
        if modules.is_empty() {
            return Err(SyncError::InvalidScript("No modules specified".into()));
        }
        let project_dir = self.existing_project_dir(key).await?;

        let wait = Instant::now();
        let _guard = self.locks.lock(key).await;
        metrics::record_lock_wait("project", wait.elapsed().as_secs_f64());
        let mut registry = scripts::load(&project_dir)
            .await
            .map_err(|e| SyncError::io("load scripts", e))?;
        let released = scripts::remove_modules(&mut registry, modules);
        let plan = ChangePlan::new(FileChangeSet::removals(released))?;
        self.apply_plan(key, &project_dir, plan, &mut NoContent, ApplyOptions::default())
            .await?;
        scripts::save(&project_dir, &registry)
            .await
            .map_err(|e| SyncError::io("save scripts", e))?;
        tracing::info!(project = %key, ?modules, "script modules removed");
        Ok(registry)
    }

    /// Registered script modules of a project.
    pub async fn scripts(&self, key: &ProjectKey) -> Result<Scripts, SyncError> {
        let dir = self.existing_project_dir(key).await?;
        scripts::load(&dir)
            .await
            .map_err(|e| SyncError::io("load scripts", e))
    }

    /// Body of a change set; the caller holds the project lock.
    async fn apply_plan(
        &self,
        key: &ProjectKey,
        project_dir: &Path,
        plan: ChangePlan,
        content: &mut dyn ContentProvider,
        options: ApplyOptions,
    ) -> Result<Manifest, SyncError> {
        let original = ManifestStore::load(project_dir)
            .await
            .map_err(|e| SyncError::io("load manifest", e))?;
        let mut manifest = original.clone();

        let (events, reporter) = match options.progress {
            Some(target) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let reporter =
                    ProgressReporter::new(target.user, target.notifier, self.throttle.clone());
                (Some(tx), Some(reporter.spawn(rx)))
            }
            None => (None, None),
        };

        let staging = self
            .projects_root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        let mut writer = UpdateWriter {
            project_dir,
            staging: &staging,
            declared: &plan.updates,
            budget: ByteBudget {
                limit: options.size_limit,
                used: 0,
            },
            step: self.config.progress_step,
            events,
            seq: 0,
            committed: Vec::new(),
        };

        let mut result = writer.write_all(content, &mut manifest).await;
        if result.is_ok() {
            result = apply_removals(project_dir, &plan.removals, &mut manifest).await;
        }

        let received = writer.budget.used;
        let committed = std::mem::take(&mut writer.committed);
        drop(writer);

        if manifest != original {
            if let Err(e) = ManifestStore::save(project_dir, &manifest).await {
                tracing::error!(project = %key, error = %e, "failed to save manifest");
                if result.is_ok() {
                    result = Err(SyncError::io("save manifest", e));
                }
            }
        }

        if let Err(e) = fs::remove_dir_all(&staging).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %staging.display(), error = %e, "failed to clean staging dir");
            }
        }
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
        metrics::increment_upload_bytes(received);

        match result {
            Ok(()) => {
                let missing: Vec<_> = plan
                    .updates
                    .keys()
                    .filter(|p| !committed.contains(p))
                    .collect();
                if !missing.is_empty() {
                    tracing::warn!(project = %key, ?missing, "declared files were not uploaded");
                }
                tracing::info!(
                    project = %key,
                    written = committed.len(),
                    removed = plan.removals.len(),
                    bytes = received,
                    "project files updated"
                );
                Ok(manifest)
            }
            Err(e) => {
                tracing::error!(project = %key, committed = committed.len(), error = %e, "project files update failed");
                Err(e)
            }
        }
    }
}

struct UpdateWriter<'a> {
    project_dir: &'a Path,
    staging: &'a Path,
    declared: &'a HashMap<String, FileEntry>,
    budget: ByteBudget,
    step: u64,
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    seq: usize,
    committed: Vec<String>,
}

impl UpdateWriter<'_> {
    async fn write_all(
        &mut self,
        content: &mut dyn ContentProvider,
        manifest: &mut Manifest,
    ) -> Result<(), SyncError> {
        while let Some(file) = content.next_file().await? {
            let path = paths::normalize(&file.name)?;
            let Some(declared) = self.declared.get(&path) else {
                return Err(SyncError::InvalidPath(format!(
                    "{path}: not declared in the change set"
                )));
            };
            let entry = self.write_file(file, &path, declared.mtime).await?;
            tracing::debug!(path = %entry.path, size = entry.size, "file committed");
            manifest.upsert(entry);
            self.committed.push(path);
        }
        Ok(())
    }

    async fn write_file(
        &mut self,
        file: FileContent<'_>,
        path: &str,
        mtime: i64,
    ) -> Result<FileEntry, SyncError> {
        fs::create_dir_all(self.staging)
            .await
            .map_err(|e| SyncError::io("create staging dir", e))?;
        self.seq += 1;
        let compressed = file.is_transport_compressed();
        let received = self.staging.join(format!("{}.part", self.seq));

        let out = fs::File::create(&received)
            .await
            .map_err(|e| SyncError::io("create staged file", e))?;
        let mut out = BufWriter::with_capacity(COPY_CHUNK, out);
        let field = file.name;
        // a decoded file may use what was left before its transport bytes
        let allowance = self.budget.remaining();
        let mut size = match &self.events {
            Some(tx) => {
                let reader = ProgressReader::new(file.reader, field, self.step, tx.clone());
                copy_counted(reader, &mut out, &mut self.budget).await?
            }
            None => copy_counted(file.reader, &mut out, &mut self.budget).await?,
        };
        out.flush()
            .await
            .map_err(|e| SyncError::io("flush staged file", e))?;
        out.get_ref()
            .sync_all()
            .await
            .map_err(|e| SyncError::io("sync staged file", e))?;
        drop(out);

        let staged = if compressed {
            let decoded = self.staging.join(format!("{}.data", self.seq));
            let transport = size;
            size = gunzip(received.clone(), decoded.clone(), allowance).await?;
            self.budget.consume(size.saturating_sub(transport))?;
            decoded
        } else {
            received
        };
        if mtime > 0 {
            set_mtime(staged.clone(), mtime).await?;
        }

        let target = paths::resolve(self.project_dir, path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::io("create parent dirs", e))?;
        }
        // Same volume as the project, so the rename is atomic.
        fs::rename(&staged, &target)
            .await
            .map_err(|e| SyncError::io(&format!("commit {path}"), e))?;

        let mtime = if mtime > 0 {
            mtime
        } else {
            modified_secs(&target).await
        };
        Ok(FileEntry::new(path, size, mtime))
    }
}

async fn copy_counted<R, W>(
    mut reader: R,
    out: &mut W,
    budget: &mut ByteBudget,
) -> Result<u64, SyncError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| SyncError::ContentRead(e.to_string()))?;
        if n == 0 {
            return Ok(total);
        }
        budget.consume(n as u64)?;
        out.write_all(&buf[..n])
            .await
            .map_err(|e| SyncError::io("write staged file", e))?;
        total += n as u64;
    }
}

/// Decode a staged gzip file. With a `limit`, stops as soon as the output
/// would exceed it.
async fn gunzip(src: PathBuf, dst: PathBuf, limit: Option<u64>) -> Result<u64, SyncError> {
    let written = tokio::task::spawn_blocking(move || -> io::Result<u64> {
        use std::io::Read;
        let input = std::fs::File::open(&src)?;
        let decoder = flate2::read::GzDecoder::new(io::BufReader::new(input));
        let mut decoder = decoder.take(limit.map_or(u64::MAX, |l| l.saturating_add(1)));
        let mut output = std::fs::File::create(&dst)?;
        let n = io::copy(&mut decoder, &mut output)?;
        output.sync_all()?;
        Ok(n)
    })
    .await
    .map_err(|e| SyncError::Io(format!("decompress task: {e}")))?
    .map_err(|e| SyncError::ContentRead(format!("gzip payload: {e}")))?;

    match limit {
        Some(limit) if written > limit => Err(SyncError::SizeLimitExceeded { limit }),
        _ => Ok(written),
    }
}

async fn set_mtime(path: PathBuf, secs: i64) -> Result<(), SyncError> {
    let when = UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(when)
    })
    .await
    .map_err(|e| SyncError::Io(format!("set mtime task: {e}")))?
    .map_err(|e| SyncError::io("set mtime", e))
}

async fn modified_secs(path: &Path) -> i64 {
    let modified = fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());
    modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

async fn apply_removals(
    project_dir: &Path,
    removals: &[String],
    manifest: &mut Manifest,
) -> Result<(), SyncError> {
    for path in removals {
        let target = paths::resolve(project_dir, path);
        let removed = match fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target).await,
            Ok(_) => fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path, "removal of missing path ignored");
            }
            Err(e) => return Err(SyncError::io(&format!("remove {path}"), e)),
        }
        manifest.remove(path);
    }
    Ok(())
}
