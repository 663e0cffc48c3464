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

use crate::storage::{
    ProjectInfo, ProjectKey, ProjectRepository, ProjectSettings, StorageError, META_DIR,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

const INFO_FILE: &str = "project.json";
const SETTINGS_FILE: &str = "settings.json";

/// Filesystem-backed project metadata. Projects live under `root/owner/name`,
/// with their metadata stored as JSON in the `.meta` directory of each project.
#[derive(Debug, Clone)]
pub struct DiskProjectRepository {
    root: PathBuf,
}

impl DiskProjectRepository {
    pub async fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::Internal(format!("init projects root {:?}: {}", root, e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, key: &ProjectKey) -> PathBuf {
        self.root.join(&key.owner).join(&key.name)
    }

    fn meta_path(&self, key: &ProjectKey, file: &str) -> PathBuf {
        self.project_dir(key).join(META_DIR).join(file)
    }

    /// Register a project directory with its metadata record.
    pub async fn create_project(
        &self,
        key: &ProjectKey,
        info: &ProjectInfo,
    ) -> Result<(), StorageError> {
        let meta_dir = self.project_dir(key).join(META_DIR);
        fs::create_dir_all(&meta_dir)
            .await
            .map_err(|e| StorageError::Internal(format!("create project {key}: {e}")))?;
        self.write_json(&meta_dir.join(INFO_FILE), info).await
    }

    pub async fn save_settings(
        &self,
        key: &ProjectKey,
        settings: &ProjectSettings,
    ) -> Result<(), StorageError> {
        let path = self.meta_path(key, SETTINGS_FILE);
        if fs::metadata(self.project_dir(key)).await.is_err() {
            return Err(StorageError::ProjectNotFound(key.to_string()));
        }
        self.write_json(&path, settings).await
    }

    async fn write_json<T: serde::Serialize>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::Internal(format!("encode {}: {e}", path.display())))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &data)
            .await
            .map_err(|e| StorageError::Internal(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| StorageError::Internal(format!("commit {}: {e}", path.display())))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> io::Result<T> {
        let raw = fs::read(path).await?;
        serde_json::from_slice(&raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[async_trait]
impl ProjectRepository for DiskProjectRepository {
    async fn project_info(&self, key: &ProjectKey) -> Result<ProjectInfo, StorageError> {
        match self.read_json(&self.meta_path(key, INFO_FILE)).await {
            Ok(info) => Ok(info),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::ProjectNotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Internal(format!("read project info {key}: {e}"))),
        }
    }

    async fn settings(&self, key: &ProjectKey) -> Result<ProjectSettings, StorageError> {
        match self.read_json(&self.meta_path(key, SETTINGS_FILE)).await {
            Ok(settings) => Ok(settings),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if fs::metadata(self.project_dir(key)).await.is_err() {
                    return Err(StorageError::ProjectNotFound(key.to_string()));
                }
                // No settings saved yet: nothing is editable.
                Ok(ProjectSettings::default())
            }
            Err(e) => Err(StorageError::Internal(format!("read settings {key}: {e}"))),
        }
    }

    async fn check(&self) -> Result<(), StorageError> {
        let meta = fs::metadata(&self.root)
            .await
            .map_err(|e| StorageError::Internal(format!("projects root {:?}: {e}", self.root)))?;
        if !meta.is_dir() {
            return Err(StorageError::Internal(format!(
                "projects root {:?} is not a directory",
                self.root
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ProjectState;

    #[tokio::test]
    async fn create_and_read_project() {
        let dir = tempfile::tempdir().unwrap();
        let repo = DiskProjectRepository::new(dir.path()).await.unwrap();
        let key = ProjectKey::new("alice", "roads").unwrap();

        assert!(matches!(
            repo.project_info(&key).await,
            Err(StorageError::ProjectNotFound(_))
        ));
        assert!(matches!(
            repo.settings(&key).await,
            Err(StorageError::ProjectNotFound(_))
        ));

        let info = ProjectInfo {
            state: ProjectState::Draft,
            definition_file: "roads.qgs".into(),
            title: "Roads".into(),
            created: None,
            last_update: None,
        };
        repo.create_project(&key, &info).await.unwrap();

        let loaded = repo.project_info(&key).await.unwrap();
        assert_eq!(loaded.state, ProjectState::Draft);
        assert_eq!(loaded.definition_file, "roads.qgs");
        assert_eq!(repo.settings(&key).await.unwrap(), ProjectSettings::default());
        repo.check().await.unwrap();
    }
}
