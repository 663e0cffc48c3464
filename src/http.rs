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

use crate::auth::{AuthError, User};
use crate::handler::BaseHandler;
use crate::observability::{health, metrics};
use crate::ows::{GatewayError, OwsParams, OwsRequest};
use crate::storage::{Manifest, ProjectKey, StorageError};
use crate::sync::{
    ApplyOptions, ContentProvider, FileChangeSet, FileContent, NoContent, ProgressTarget,
    ScriptUpload, Scripts, SyncError,
};
use async_trait::async_trait;
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, MatchedPath, Multipart, Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::io::StreamReader;

/// Cap on the JSON part leading a multipart upload.
const MAX_UPLOAD_INFO_BYTES: usize = 1024 * 1024;

/// HTTP API wrapping BaseHandler
#[derive(Clone)]
pub struct HttpHandler {
    handler: Arc<BaseHandler>,
}

impl HttpHandler {
    pub fn new(handler: BaseHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn router(self) -> Router {
        let max_ows_body = self.handler.max_ows_body;
        Router::new()
            .route(
                "/api/project/upload/:user/:name",
                post(upload_files).layer(DefaultBodyLimit::disable()),
            )
            .route(
                "/api/project/files/:user/:name",
                get(list_files).delete(delete_files),
            )
            .route(
                "/api/project/script/:user/:name",
                post(upload_script)
                    .layer(DefaultBodyLimit::disable())
                    .delete(delete_scripts),
            )
            .route("/api/project/reload/:user/:name", post(reload_project))
            .route(
                "/api/project/map/:user/:name",
                get(project_map_preview)
                    .post(project_map_preview)
                    .layer(DefaultBodyLimit::max(max_ows_body)),
            )
            .route(
                "/api/map/ows/:user/:name",
                get(map_ows)
                    .post(map_ows)
                    .layer(DefaultBodyLimit::max(max_ows_body)),
            )
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_endpoint))
            .route_layer(middleware::from_fn(track_metrics))
            .with_state(self.handler)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials => ApiError::Unauthorized,
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Sync(e) => match e {
                SyncError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
                SyncError::InvalidPath(_)
                | SyncError::ContentRead(_)
                | SyncError::InvalidScript(_) => StatusCode::BAD_REQUEST,
                SyncError::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                SyncError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Gateway(e) => match e {
                GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::NotPublished(_)
                | GatewayError::Parse(_)
                | GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
                GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
                GatewayError::Upstream { status, .. } => *status,
                GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
                GatewayError::Storage(_) | GatewayError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Storage(e) => match e {
                StorageError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                StorageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        match self {
            ApiError::Unauthorized | ApiError::InvalidCredentials => (
                status,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"mapgate\"")],
                self.to_string(),
            )
                .into_response(),
            other => (status, other.to_string()).into_response(),
        }
    }
}

fn project_key(user: &str, name: &str) -> Result<ProjectKey, ApiError> {
    Ok(ProjectKey::new(user, name)?)
}

async fn authenticate(handler: &BaseHandler, headers: &HeaderMap) -> Result<User, AuthError> {
    let result = handler.auth.authenticate(headers).await;
    match &result {
        Ok(_) => metrics::increment_auth_success(),
        Err(AuthError::MissingCredentials) => {}
        Err(_) => metrics::increment_auth_failure(),
    }
    result
}

/// Caller of a management route; must own the project or be a superuser.
async fn require_admin(
    handler: &BaseHandler,
    headers: &HeaderMap,
    key: &ProjectKey,
) -> Result<User, ApiError> {
    let user = authenticate(handler, headers).await?;
    if user.is_superuser || user.username == key.owner {
        Ok(user)
    } else {
        tracing::warn!(user = %user.username, project = %key, "project access denied");
        Err(ApiError::Forbidden(format!("no admin access to project {key}")))
    }
}

/// Content of a multipart upload: every part after the upload info is one
/// file, named by its field, gzip encoded when its file name says so.
pub struct MultipartContent {
    multipart: Multipart,
}

impl MultipartContent {
    pub fn new(multipart: Multipart) -> Self {
        Self { multipart }
    }
}

#[async_trait]
impl ContentProvider for MultipartContent {
    async fn next_file<'a>(&'a mut self) -> Result<Option<FileContent<'a>>, SyncError> {
        let field = match self.multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(SyncError::ContentRead(e.body_text())),
        };
        let name = field
            .name()
            .map(str::to_string)
            .ok_or_else(|| SyncError::ContentRead("multipart part without a name".into()))?;
        let transport_name = field.file_name().map(str::to_string);

        let stream = Box::pin(field.map_err(io::Error::other));
        let content = FileContent::new(name, StreamReader::new(stream));
        Ok(Some(match transport_name {
            Some(t) => content.with_transport_name(t),
            None => content,
        }))
    }
}

/// Reads the leading JSON part of a multipart upload, at most
/// `MAX_UPLOAD_INFO_BYTES` of it.
async fn read_upload_info<T: DeserializeOwned>(multipart: &mut Multipart) -> Result<T, ApiError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
        .ok_or_else(|| ApiError::BadRequest("Missing upload info".into()))?;
    let raw = read_bounded(field, MAX_UPLOAD_INFO_BYTES).await?;
    serde_json::from_slice(&raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid upload info: {e}")))
}

async fn read_bounded(mut field: Field<'_>, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(format!(
                "upload info exceeds {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// POST /api/project/upload/{user}/{name} - Apply a multipart change set
async fn upload_files(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Manifest>, ApiError> {
    let key = project_key(&user, &name)?;
    let caller = require_admin(&handler, &headers, &key).await?;

    let changes: FileChangeSet = read_upload_info(&mut multipart).await?;

    tracing::info!(
        project = %key,
        user = %caller.username,
        updates = changes.updates.len(),
        removals = changes.removals.len(),
        "upload started"
    );
    let options = ApplyOptions {
        size_limit: (!caller.is_superuser).then_some(handler.max_project_size),
        progress: Some(ProgressTarget {
            user: caller.username.clone(),
            notifier: handler.notifier.clone(),
        }),
    };
    let mut content = MultipartContent::new(multipart);
    let manifest = handler
        .engine
        .apply_changes(&key, changes, &mut content, options)
        .await?;
    Ok(Json(manifest))
}

/// POST /api/project/script/{user}/{name} - Install a web script module
async fn upload_script(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Scripts>, ApiError> {
    let key = project_key(&user, &name)?;
    let caller = require_admin(&handler, &headers, &key).await?;
    let upload: ScriptUpload = read_upload_info(&mut multipart).await?;

    tracing::info!(
        project = %key,
        user = %caller.username,
        module = %upload.module,
        components = upload.script.components.len(),
        "script upload started"
    );
    let options = ApplyOptions {
        size_limit: (!caller.is_superuser).then_some(handler.max_project_size),
        progress: None,
    };
    let mut content = MultipartContent::new(multipart);
    let scripts = handler
        .engine
        .install_script(&key, upload, &mut content, options)
        .await?;
    Ok(Json(scripts))
}

/// DELETE /api/project/script/{user}/{name} - Remove web script modules.
/// The body is a JSON array of module names.
async fn delete_scripts(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Scripts>, ApiError> {
    let key = project_key(&user, &name)?;
    require_admin(&handler, &headers, &key).await?;
    let modules: Vec<String> = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;
    Ok(Json(handler.engine.remove_scripts(&key, &modules).await?))
}

#[derive(Debug, Deserialize)]
struct DeleteFilesRequest {
    #[serde(default)]
    files: Vec<String>,
}

/// DELETE /api/project/files/{user}/{name} - Remove files from a project
async fn delete_files(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Manifest>, ApiError> {
    let key = project_key(&user, &name)?;
    require_admin(&handler, &headers, &key).await?;

    let request: DeleteFilesRequest = if body.is_empty() {
        DeleteFilesRequest { files: Vec::new() }
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };
    if request.files.is_empty() {
        return Err(ApiError::BadRequest("No files specified".into()));
    }

    let manifest = handler
        .engine
        .apply_changes(
            &key,
            FileChangeSet::removals(request.files),
            &mut NoContent,
            ApplyOptions::default(),
        )
        .await?;
    Ok(Json(manifest))
}

/// GET /api/project/files/{user}/{name} - Current project manifest
async fn list_files(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Manifest>, ApiError> {
    let key = project_key(&user, &name)?;
    require_admin(&handler, &headers, &key).await?;
    Ok(Json(handler.engine.manifest(&key).await?))
}

/// POST /api/project/reload/{user}/{name} - Ask the map server to re-read a project
async fn reload_project(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let key = project_key(&user, &name)?;
    require_admin(&handler, &headers, &key).await?;
    let map = handler.gateway.project_map(&key).await?;
    handler.gateway.proxy().reload(&map).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET|POST /api/project/map/{user}/{name} - Owner preview of a project,
/// published or not
async fn project_map_preview(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = project_key(&user, &name)?;
    require_admin(&handler, &headers, &key).await?;
    let request = OwsRequest {
        method,
        params: OwsParams::from_query(uri.query()),
        headers,
        body,
    };
    Ok(handler.gateway.preview(&key, request).await?)
}

/// GET|POST /api/map/ows/{user}/{name} - Authorized map service proxy
async fn map_ows(
    State(handler): State<Arc<BaseHandler>>,
    Path((user, name)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = project_key(&user, &name)?;
    let caller = match authenticate(&handler, &headers).await {
        Ok(user) => user,
        Err(AuthError::MissingCredentials) => User::anonymous(),
        Err(e) => return Err(e.into()),
    };
    let request = OwsRequest {
        method,
        params: OwsParams::from_query(uri.query()),
        headers,
        body,
    };
    Ok(handler.gateway.handle(&key, &caller, request).await?)
}

/// GET /health - Backend health as JSON
async fn health_check(State(handler): State<Arc<BaseHandler>>) -> impl IntoResponse {
    let status = health::get_health_status(&handler.repository, &handler.auth).await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// GET /metrics - Prometheus text exposition
async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    metrics::inc_concurrent_requests("http");
    let response = next.run(req).await;
    metrics::dec_concurrent_requests("http");

    let status = response.status().as_u16().to_string();
    metrics::increment_http_request(&method, &endpoint, &status);
    metrics::record_http_duration(&method, &endpoint, &status, start.elapsed().as_secs_f64());
    response
}
