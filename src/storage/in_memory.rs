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

use crate::storage::{ProjectInfo, ProjectKey, ProjectRepository, ProjectSettings, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredProject {
    info: ProjectInfo,
    settings: ProjectSettings,
}

/// In-memory project metadata, keyed by `ProjectKey`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProjectRepository {
    projects: Arc<RwLock<BTreeMap<ProjectKey, StoredProject>>>,
}

impl InMemoryProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: ProjectKey, info: ProjectInfo, settings: ProjectSettings) {
        let mut projects = self.projects.write().await;
        projects.insert(key, StoredProject { info, settings });
    }

    pub async fn remove(&self, key: &ProjectKey) -> bool {
        self.projects.write().await.remove(key).is_some()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryProjectRepository {
    async fn project_info(&self, key: &ProjectKey) -> Result<ProjectInfo, StorageError> {
        let projects = self.projects.read().await;
        projects
            .get(key)
            .map(|p| p.info.clone())
            .ok_or_else(|| StorageError::ProjectNotFound(key.to_string()))
    }

    async fn settings(&self, key: &ProjectKey) -> Result<ProjectSettings, StorageError> {
        let projects = self.projects.read().await;
        projects
            .get(key)
            .map(|p| p.settings.clone())
            .ok_or_else(|| StorageError::ProjectNotFound(key.to_string()))
    }
}
