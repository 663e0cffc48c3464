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

use crate::sync::SyncConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP listen address, e.g. "0.0.0.0:3000"
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Path to the accounts file, one `username:password[:superuser]` per line
    #[serde(default = "default_auth_file")]
    pub auth_file: String,

    #[serde(default)]
    pub projects: ProjectsConfig,

    #[serde(default)]
    pub mapserver: MapserverConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectsConfig {
    /// Directory holding `<owner>/<name>` project trees
    #[serde(default = "default_projects_root")]
    pub root: String,
    /// The projects directory as the map server sees it. Differs from `root`
    /// when the renderer runs in another container or host.
    #[serde(default)]
    pub map_root: Option<String>,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            root: default_projects_root(),
            map_root: None,
        }
    }
}

impl ProjectsConfig {
    pub fn effective_map_root(&self) -> &str {
        self.map_root.as_deref().unwrap_or(&self.root)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapserverConfig {
    /// Base URL of the map rendering service
    #[serde(default = "default_mapserver_url")]
    pub url: String,
    /// Upper bound for one upstream round trip
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest OWS request body accepted for authorization
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for MapserverConfig {
    fn default() -> Self {
        Self {
            url: default_mapserver_url(),
            timeout_secs: default_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl MapserverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Aggregate size cap for uploads by non-superusers, in bytes
    #[serde(default = "default_max_project_size")]
    pub max_project_size: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Bytes read from one stream between two progress events
    #[serde(default = "default_progress_step")]
    pub progress_step: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_project_size: default_max_project_size(),
            progress_interval_ms: default_progress_interval_ms(),
            progress_step: default_progress_step(),
        }
    }
}

impl UploadConfig {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            progress_step: self.progress_step.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            auth_file: default_auth_file(),
            projects: ProjectsConfig::default(),
            mapserver: MapserverConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn from_path(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_auth_file() -> String {
    "./users.txt".to_string()
}

fn default_projects_root() -> String {
    "/publish".to_string()
}

fn default_mapserver_url() -> String {
    "http://qgisserver/ows/".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_project_size() -> u64 {
    100 * 1024 * 1024
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_progress_step() -> u64 {
    32 * 1024
}
