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

use crate::config::MapserverConfig;
use crate::observability::metrics;
use crate::ows::{GatewayError, OwsParams};
use crate::storage::ProjectKey;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Instant;
use url::Url;

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Reverse proxy to the map rendering service.
#[derive(Debug, Clone)]
pub struct MapProxy {
    client: reqwest::Client,
    base: Url,
    map_root: PathBuf,
}

impl MapProxy {
    pub fn new(config: &MapserverConfig, map_root: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let base = Url::parse(&config.url)
            .map_err(|e| GatewayError::Config(format!("mapserver url {:?}: {e}", config.url)))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base,
            map_root: map_root.into(),
        })
    }

    /// Absolute path of the project definition file as the renderer sees it.
    pub fn map_path(&self, key: &ProjectKey, definition_file: &str) -> String {
        let mut path = self.map_root.join(&key.owner).join(&key.name);
        for part in definition_file.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.to_string_lossy().into_owned()
    }

    fn target(&self, params: &OwsParams) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params.iter() {
                query.append_pair(name, value);
            }
        }
        url
    }

    /// Forward one request. The response is streamed back unchanged apart
    /// from hop-by-hop headers.
    pub async fn forward(
        &self,
        method: Method,
        params: &OwsParams,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, GatewayError> {
        let url = self.target(params);

        let mut outgoing = HeaderMap::with_capacity(headers.len() + 1);
        for (name, value) in headers {
            if is_hop_by_hop(name)
                || name == header::HOST
                || name == header::CONTENT_LENGTH
                || name == header::AUTHORIZATION
            {
                continue;
            }
            outgoing.append(name.clone(), value.clone());
        }
        if !outgoing.contains_key(header::USER_AGENT) {
            // sent blank so the client library does not inject its own
            outgoing.insert(header::USER_AGENT, HeaderValue::from_static(""));
        }

        tracing::debug!(%method, url = %url, "forwarding to map server");
        let mut request = self.client.request(method, url).headers(outgoing);
        if !body.is_empty() {
            request = request.body(body);
        }

        let started = Instant::now();
        let upstream = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let outcome = if e.is_timeout() { "timeout" } else { "error" };
                metrics::record_upstream_duration(outcome, started.elapsed().as_secs_f64());
                return Err(upstream_failure(e));
            }
        };
        let status = upstream.status();
        metrics::record_upstream_duration(
            if status.is_success() { "ok" } else { "status" },
            started.elapsed().as_secs_f64(),
        );

        if status.is_client_error() || status.is_server_error() {
            let message = upstream.text().await.unwrap_or_default();
            return Err(upstream_status(status, message));
        }

        let mut builder = Response::builder().status(status);
        if let Some(out) = builder.headers_mut() {
            for (name, value) in upstream.headers() {
                if !is_hop_by_hop(name) && name != header::CONTENT_LENGTH {
                    out.append(name.clone(), value.clone());
                }
            }
        }
        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| GatewayError::Upstream {
                status: StatusCode::BAD_GATEWAY,
                message: e.to_string(),
            })
    }

    /// Ask the renderer to drop its cached copy of a project definition.
    pub async fn reload(&self, map: &str) -> Result<(), GatewayError> {
        let mut url = self
            .base
            .join("reload")
            .map_err(|e| GatewayError::Config(format!("reload url: {e}")))?;
        url.query_pairs_mut().clear().append_pair("project", map);

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(upstream_failure)?;
        let status = response.status();
        if status != StatusCode::OK {
            let message = response.text().await.unwrap_or_default();
            return Err(upstream_status(status, message));
        }
        tracing::info!(map, "project reloaded by map server");
        Ok(())
    }
}

fn upstream_failure(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::UpstreamTimeout
    } else {
        GatewayError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            message: format!("map server unreachable: {e}"),
        }
    }
}

/// Client errors of the renderer keep their status; anything else is a bad
/// gateway.
fn upstream_status(status: StatusCode, message: String) -> GatewayError {
    let message = if message.trim().is_empty() {
        format!("map server responded with {status}")
    } else {
        message
    };
    GatewayError::Upstream {
        status: if status.is_client_error() {
            status
        } else {
            StatusCode::BAD_GATEWAY
        },
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(url: &str) -> MapProxy {
        let config = MapserverConfig {
            url: url.to_string(),
            ..MapserverConfig::default()
        };
        MapProxy::new(&config, "/publish").unwrap()
    }

    #[test]
    fn map_path_joins_project_and_definition() {
        let p = proxy("http://renderer/ows/");
        let key = ProjectKey::new("alice", "roads").unwrap();
        assert_eq!(p.map_path(&key, "roads.qgs"), "/publish/alice/roads/roads.qgs");
        assert_eq!(p.map_path(&key, "sub/roads.qgs"), "/publish/alice/roads/sub/roads.qgs");
    }

    #[test]
    fn target_replaces_query_and_keeps_path() {
        let p = proxy("http://renderer:8080/cgi-bin/qgis_mapserv.fcgi?MAP=ignored");
        let params = OwsParams::from_query(Some("SERVICE=WMS&REQUEST=GetMap&LAYERS=a%20b"));
        let url = p.target(&params);
        assert_eq!(url.host_str(), Some("renderer"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.path(), "/cgi-bin/qgis_mapserv.fcgi");
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("SERVICE".to_string(), "WMS".to_string()),
                ("REQUEST".to_string(), "GetMap".to_string()),
                ("LAYERS".to_string(), "a b".to_string()),
            ]
        );
    }

    #[test]
    fn bad_url_is_a_config_error() {
        let config = MapserverConfig {
            url: "not a url".into(),
            ..MapserverConfig::default()
        };
        assert!(matches!(MapProxy::new(&config, "/publish"), Err(GatewayError::Config(_))));
    }

    #[test]
    fn upstream_status_mapping() {
        match upstream_status(StatusCode::NOT_FOUND, "no such layer".into()) {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "no such layer");
            }
            other => panic!("unexpected {other:?}"),
        }
        match upstream_status(StatusCode::INTERNAL_SERVER_ERROR, String::new()) {
            GatewayError::Upstream { status, message } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert!(message.contains("500"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
