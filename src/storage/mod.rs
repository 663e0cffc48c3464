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

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod disk;
pub mod in_memory;
pub mod manifest;
pub mod settings;

pub use disk::DiskProjectRepository;
pub use in_memory::InMemoryProjectRepository;
pub use manifest::{FileEntry, Manifest, ManifestStore};
pub use settings::{LayerPermission, ProjectSettings};

/// Name of the per-project directory holding metadata, settings and the manifest.
/// User content may never be written below it.
pub const META_DIR: &str = ".meta";

/// A project is addressed by its owner and its name; on disk it lives under
/// `<projects root>/<owner>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectKey {
    pub owner: String,
    pub name: String,
}

impl ProjectKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, StorageError> {
        let owner = owner.into();
        let name = name.into();
        validate_segment("owner", &owner)?;
        validate_segment("name", &name)?;
        Ok(Self { owner, name })
    }
}

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn validate_segment(what: &str, value: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::InvalidInput(format!("project {what} must be non-empty")));
    }
    if value.starts_with('.') || value.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidInput(format!(
            "project {what} is not a valid path segment: {value}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Empty,
    Draft,
    Published,
}

/// Project record owned by the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub state: ProjectState,
    /// Project definition file, relative to the project directory.
    #[serde(alias = "qgis_file")]
    pub definition_file: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal storage error: {0}")]
    Internal(String),
}

/// Read side of the project metadata store: lifecycle state, definition file
/// and the permission settings consumed by the OWS gateway.
#[async_trait]
pub trait ProjectRepository: Send + Sync + 'static {
    async fn project_info(&self, key: &ProjectKey) -> Result<ProjectInfo, StorageError>;

    async fn settings(&self, key: &ProjectKey) -> Result<ProjectSettings, StorageError>;

    /// Cheap liveness probe used by the health endpoint.
    async fn check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
