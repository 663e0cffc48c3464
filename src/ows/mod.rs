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

//! OWS authorization gateway.
//!
//! Every map service request for a project goes through
//! [`OwsGateway::handle`]:
//!
//! 1. the project must exist and be published;
//! 2. WFS transactions are decoded and each operation is checked against the
//!    caller's layer permissions, the first denied operation rejects the
//!    whole request;
//! 3. the `MAP` parameter is pointed at the project definition file and the
//!    request is forwarded to the map server.

pub mod permissions;
pub mod proxy;
pub mod transaction;

pub use permissions::{EditAction, PermissionCache};
pub use proxy::MapProxy;
pub use transaction::{ParseError, TransactionOp};

use crate::auth::User;
use crate::observability::metrics;
use crate::storage::{ProjectKey, ProjectRepository, ProjectSettings, ProjectState, StorageError};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("project not found: {0}")]
    NotFound(String),
    #[error("project is not published: {0}")]
    NotPublished(String),
    #[error("{action} not permitted on layer {layer}")]
    Forbidden { action: EditAction, layer: String },
    #[error("invalid transaction: {0}")]
    Parse(#[from] ParseError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },
    #[error("map server timed out")]
    UpstreamTimeout,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("gateway misconfigured: {0}")]
    Config(String),
}

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::ProjectNotFound(key) => GatewayError::NotFound(key),
            StorageError::InvalidInput(msg) => GatewayError::BadRequest(msg),
            StorageError::Internal(msg) => GatewayError::Storage(msg),
        }
    }
}

impl GatewayError {
    fn decision(&self) -> &'static str {
        match self {
            GatewayError::Forbidden { .. } => "denied",
            GatewayError::Parse(_) | GatewayError::BadRequest(_) => "invalid",
            GatewayError::NotFound(_) | GatewayError::NotPublished(_) => "rejected",
            GatewayError::Upstream { .. } | GatewayError::UpstreamTimeout => "upstream_error",
            GatewayError::Storage(_) | GatewayError::Config(_) => "error",
        }
    }
}

/// Query parameters of an OWS request.
///
/// Order and spelling are kept for forwarding; lookups ignore ASCII case the
/// way OWS servers do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwsParams {
    pairs: Vec<(String, String)>,
}

impl OwsParams {
    pub fn from_query(query: Option<&str>) -> Self {
        let pairs = query
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { pairs }
    }

    /// First non-empty value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .find(|v| !v.trim().is_empty())
    }

    /// Replace every spelling of `name` with a single pair, kept at the
    /// position of the first occurrence.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter().position(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(first) => {
                self.pairs[first] = (name.to_string(), value);
                let mut idx = 0;
                self.pairs.retain(|(k, _)| {
                    let keep = idx <= first || !k.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
            }
            None => self.pairs.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `SERVICE` value, upper-cased, or empty.
    pub fn service(&self) -> String {
        self.get("SERVICE").unwrap_or_default().trim().to_ascii_uppercase()
    }

    /// Key-value encoded transaction: `REQUEST=Transaction`, whatever
    /// `SERVICE` says.
    pub fn is_transaction(&self) -> bool {
        self.get("REQUEST")
            .is_some_and(|request| request.trim().eq_ignore_ascii_case("Transaction"))
    }

    /// `self` followed by the pairs of `other` whose names `self` lacks.
    fn or_else(mut self, other: &OwsParams) -> Self {
        for (name, value) in other.iter() {
            if self.get(name).is_none() {
                self.pairs.push((name.to_string(), value.to_string()));
            }
        }
        self
    }
}

/// One inbound map service request.
#[derive(Debug, Clone)]
pub struct OwsRequest {
    pub method: Method,
    pub params: OwsParams,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Transactional operations carried by a request.
///
/// The map server reads the operation from an XML body regardless of the
/// query string, so any XML body is decoded, and a malformed one is refused.
/// A form encoded body is read as key-value pairs ahead of the query.
pub fn transaction_ops(request: &OwsRequest) -> Result<Vec<TransactionOp>, ParseError> {
    let body = xml_start(&request.body);
    if body.first() == Some(&b'<') {
        return transaction::parse(body);
    }
    let params = if body.is_empty() {
        request.params.clone()
    } else {
        OwsParams::from_query(Some(&String::from_utf8_lossy(body))).or_else(&request.params)
    };
    if params.is_transaction() {
        transaction::from_kvp(params.get("OPERATION"), params.get("TYPENAME"))
    } else {
        Ok(Vec::new())
    }
}

/// `body` without leading whitespace and byte order mark.
fn xml_start(body: &[u8]) -> &[u8] {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    &body[start..]
}

/// Check every operation against the layer permissions of `user`.
pub fn authorize(
    settings: &ProjectSettings,
    user: &User,
    ops: &[TransactionOp],
) -> Result<(), GatewayError> {
    let mut permissions = PermissionCache::new(settings, user);
    for op in ops {
        let action = op.action();
        if !action.allowed_by(&permissions.get(op.layer_name())) {
            metrics::increment_denied_operation(action.as_str());
            return Err(GatewayError::Forbidden {
                action,
                layer: op.layer_name().to_string(),
            });
        }
    }
    Ok(())
}

pub struct OwsGateway {
    repository: Arc<dyn ProjectRepository>,
    proxy: MapProxy,
}

impl OwsGateway {
    pub fn new(repository: Arc<dyn ProjectRepository>, proxy: MapProxy) -> Self {
        Self { repository, proxy }
    }

    pub fn proxy(&self) -> &MapProxy {
        &self.proxy
    }

    /// Absolute definition file path of a project, whatever its state.
    pub async fn project_map(&self, key: &ProjectKey) -> Result<String, GatewayError> {
        let info = self.repository.project_info(key).await?;
        Ok(self.proxy.map_path(key, &info.definition_file))
    }

    /// Absolute definition file path of a published project.
    pub async fn published_map(&self, key: &ProjectKey) -> Result<String, GatewayError> {
        let info = self.repository.project_info(key).await?;
        if info.state != ProjectState::Published {
            return Err(GatewayError::NotPublished(key.to_string()));
        }
        Ok(self.proxy.map_path(key, &info.definition_file))
    }

    pub async fn handle(
        &self,
        key: &ProjectKey,
        user: &User,
        request: OwsRequest,
    ) -> Result<Response, GatewayError> {
        let service = request.params.service();
        let result = self.handle_inner(key, user, request).await;
        let decision = match &result {
            Ok(_) => "forwarded",
            Err(e) => {
                tracing::warn!(project = %key, user = %user.username, error = %e, "ows request refused");
                e.decision()
            }
        };
        let service = if service.is_empty() { "unknown" } else { service.as_str() };
        metrics::increment_ows_request(service, decision);
        result
    }

    /// Forward a request to any project, published or not, without
    /// transaction checks. For callers already holding admin access.
    pub async fn preview(
        &self,
        key: &ProjectKey,
        mut request: OwsRequest,
    ) -> Result<Response, GatewayError> {
        let service = request.params.service();
        let service = if service.is_empty() { "unknown".to_string() } else { service };
        let result = match self.project_map(key).await {
            Ok(map) => {
                request.params.set("MAP", map);
                self.proxy
                    .forward(request.method, &request.params, &request.headers, request.body)
                    .await
            }
            Err(e) => Err(e),
        };
        let decision = match &result {
            Ok(_) => "preview",
            Err(e) => e.decision(),
        };
        metrics::increment_ows_request(&service, decision);
        result
    }

    async fn handle_inner(
        &self,
        key: &ProjectKey,
        user: &User,
        mut request: OwsRequest,
    ) -> Result<Response, GatewayError> {
        let map = self.published_map(key).await?;

        let ops = transaction_ops(&request)?;
        if !ops.is_empty() {
            let settings = self.repository.settings(key).await?;
            authorize(&settings, user, &ops)?;
            tracing::info!(project = %key, user = %user.username, operations = ops.len(), "transaction authorized");
        }

        request.params.set("MAP", map);
        self.proxy
            .forward(request.method, &request.params, &request.headers, request.body)
            .await
    }
}
