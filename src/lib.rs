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

//! Map project publishing server.
//!
//! Two subsystems carry the weight: [`sync`] applies uploaded file changes to
//! project directories and reports progress while it does, and [`ows`]
//! authorizes map service requests, WFS transactions in particular, before
//! proxying them to the map renderer.

pub mod auth;
pub mod config;
pub mod handler;
pub mod http;
pub mod notify;
pub mod observability;
pub mod ows;
pub mod server;
pub mod storage;
pub mod sync;

pub use auth::{Authenticator, User};
pub use handler::BaseHandler;
pub use http::HttpHandler;
pub use ows::OwsGateway;
pub use storage::{ProjectKey, ProjectRepository};
pub use sync::{FileChangeSet, SyncEngine};
