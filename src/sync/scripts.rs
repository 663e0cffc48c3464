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

//! Web script modules of a project.
//!
//! Module files live under `web/components/`; the registry mapping module
//! names to their entry path and component files is `.meta/scripts.json`.

use super::content::{ContentProvider, FileContent};
use super::{paths, FileChangeSet, SyncError};
use crate::storage::manifest::{load_meta_json, save_meta_json};
use crate::storage::FileEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

const SCRIPTS_FILE: &str = "scripts.json";
pub const COMPONENTS_DIR: &str = "web/components";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptModule {
    /// Entry point, relative to `web/`.
    #[serde(default)]
    pub path: String,
    /// Files of the module, relative to `web/components/`.
    #[serde(default)]
    pub components: Vec<String>,
}

pub type Scripts = BTreeMap<String, ScriptModule>;

/// Metadata part of a script upload.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptUpload {
    pub module: String,
    #[serde(flatten)]
    pub script: ScriptModule,
}

impl ScriptUpload {
    /// Checks the module and returns the change set writing its components.
    pub(crate) fn change_set(&self) -> Result<FileChangeSet, SyncError> {
        if self.module.trim().is_empty() || self.script.components.is_empty() {
            return Err(SyncError::InvalidScript(
                "Invalid script module data".into(),
            ));
        }
        let mut updates = Vec::with_capacity(self.script.components.len());
        for component in &self.script.components {
            let path = paths::normalize(&component_path(component))?;
            updates.push(FileEntry::new(path, 0, 0));
        }
        Ok(FileChangeSet {
            updates,
            removals: Vec::new(),
        })
    }

    /// Registry entry, with the path made relative to `web/`.
    pub(crate) fn into_entry(self) -> (String, ScriptModule) {
        let path = self.script.path.trim_start_matches('/');
        let module = ScriptModule {
            path: format!("components/{path}"),
            components: self.script.components,
        };
        (self.module, module)
    }
}

pub fn component_path(component: &str) -> String {
    format!("{COMPONENTS_DIR}/{}", component.trim_start_matches('/'))
}

/// Drops `names` from the registry and returns the component paths no
/// remaining module refers to.
pub(crate) fn remove_modules(scripts: &mut Scripts, names: &[String]) -> Vec<String> {
    let mut released = BTreeSet::new();
    for name in names {
        if let Some(module) = scripts.remove(name) {
            released.extend(module.components);
        }
    }
    for module in scripts.values() {
        for component in &module.components {
            released.remove(component);
        }
    }
    released.iter().map(|c| component_path(c)).collect()
}

pub(crate) async fn load(project_dir: &Path) -> io::Result<Scripts> {
    load_meta_json(project_dir, SCRIPTS_FILE).await
}

pub(crate) async fn save(project_dir: &Path, scripts: &Scripts) -> io::Result<()> {
    save_meta_json(project_dir, SCRIPTS_FILE, scripts).await
}

/// Places every file of the wrapped provider under `web/components/`, named
/// by its transport file name when it has one.
pub(crate) struct ComponentContent<'c> {
    inner: &'c mut dyn ContentProvider,
}

impl<'c> ComponentContent<'c> {
    pub(crate) fn new(inner: &'c mut dyn ContentProvider) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ContentProvider for ComponentContent<'_> {
    async fn next_file<'a>(&'a mut self) -> Result<Option<FileContent<'a>>, SyncError> {
        let Some(mut file) = self.inner.next_file().await? else {
            return Ok(None);
        };
        let file_name = file
            .transport_name
            .as_deref()
            .unwrap_or(&file.name)
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .to_string();
        file.name = component_path(&file_name);
        Ok(Some(file))
    }
}
