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

use crate::auth::Authenticator;
use crate::config::{Config, MapserverConfig, UploadConfig};
use crate::notify::Notifier;
use crate::ows::{MapProxy, OwsGateway};
use crate::storage::{DiskProjectRepository, ProjectRepository};
use crate::sync::SyncEngine;
use std::sync::Arc;

/// Components shared by every request handler.
#[derive(Clone)]
pub struct BaseHandler {
    pub auth: Arc<dyn Authenticator>,
    pub repository: Arc<dyn ProjectRepository>,
    pub engine: Arc<SyncEngine>,
    pub gateway: Arc<OwsGateway>,
    pub notifier: Arc<dyn Notifier>,
    /// Upload cap for non-superusers, in bytes.
    pub max_project_size: u64,
    /// Largest OWS request body accepted.
    pub max_ows_body: usize,
}

impl BaseHandler {
    pub fn new(
        auth: Arc<dyn Authenticator>,
        repository: Arc<dyn ProjectRepository>,
        engine: Arc<SyncEngine>,
        gateway: Arc<OwsGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            auth,
            repository,
            engine,
            gateway,
            notifier,
            max_project_size: UploadConfig::default().max_project_size,
            max_ows_body: MapserverConfig::default().max_body_bytes,
        }
    }

    pub fn with_limits(mut self, max_project_size: u64, max_ows_body: usize) -> Self {
        self.max_project_size = max_project_size;
        self.max_ows_body = max_ows_body;
        self
    }

    /// Wire up the disk backed components described by `cfg`.
    pub async fn from_config(
        cfg: &Config,
        auth: Arc<dyn Authenticator>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let repository: Arc<dyn ProjectRepository> =
            Arc::new(DiskProjectRepository::new(&cfg.projects.root).await?);
        let engine = Arc::new(SyncEngine::new(&cfg.projects.root, cfg.upload.sync_config()));
        let proxy = MapProxy::new(&cfg.mapserver, cfg.projects.effective_map_root())?;
        let gateway = Arc::new(OwsGateway::new(repository.clone(), proxy));

        Ok(Self::new(auth, repository, engine, gateway, notifier)
            .with_limits(cfg.upload.max_project_size, cfg.mapserver.max_body_bytes))
    }
}
