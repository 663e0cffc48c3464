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

//! Gateway tests against a fake map renderer that records what it receives.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::Router;
use http_body_util::BodyExt;
use mapgate::auth::User;
use mapgate::config::MapserverConfig;
use mapgate::ows::{EditAction, GatewayError, MapProxy, OwsGateway, OwsParams, OwsRequest};
use mapgate::storage::{
    InMemoryProjectRepository, ProjectInfo, ProjectKey, ProjectSettings, ProjectState,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    query: Vec<(String, String)>,
    body: Bytes,
    user_agent: Option<String>,
    authorization: bool,
}

impl Captured {
    fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type Log = Arc<Mutex<Vec<Captured>>>;

async fn render(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query: Vec<(String, String)> = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let captured = Captured {
        method,
        query,
        body,
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        authorization: headers.contains_key(header::AUTHORIZATION),
    };
    let bogus = captured.param("REQUEST") == Some("Bogus");
    log.lock().push(captured);

    if bogus {
        return (StatusCode::BAD_REQUEST, "unknown request").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/xml")],
        "<ServiceExceptionReport/>",
    )
        .into_response()
}

async fn reload() -> StatusCode {
    StatusCode::OK
}

async fn spawn_renderer() -> (SocketAddr, Log) {
    let log: Log = Arc::default();
    let app = Router::new()
        .route("/ows/", any(render))
        .route("/ows/reload", post(reload))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, log)
}

fn settings() -> ProjectSettings {
    serde_json::from_str(
        r#"{
            "layers": {
                "parcels_1a2b": {"name": "parcels", "flags": ["update"]},
                "roads_3c4d": {"name": "roads", "flags": ["edit"]}
            }
        }"#,
    )
    .unwrap()
}

fn info(state: ProjectState) -> ProjectInfo {
    ProjectInfo {
        state,
        definition_file: "roads.qgs".into(),
        title: String::new(),
        created: None,
        last_update: None,
    }
}

async fn gateway(url: String) -> OwsGateway {
    let repository = InMemoryProjectRepository::new();
    repository
        .insert(
            ProjectKey::new("alice", "roads").unwrap(),
            info(ProjectState::Published),
            settings(),
        )
        .await;
    repository
        .insert(
            ProjectKey::new("alice", "draft").unwrap(),
            info(ProjectState::Draft),
            settings(),
        )
        .await;
    let config = MapserverConfig {
        url,
        ..MapserverConfig::default()
    };
    let proxy = MapProxy::new(&config, "/srv/maps").unwrap();
    OwsGateway::new(Arc::new(repository), proxy)
}

fn request(method: Method, query: &str, body: &'static [u8]) -> OwsRequest {
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Ym9iOnNlY3JldA=="));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"));
    OwsRequest {
        method,
        params: OwsParams::from_query(Some(query)),
        headers,
        body: Bytes::from_static(body),
    }
}

fn roads() -> ProjectKey {
    ProjectKey::new("alice", "roads").unwrap()
}

fn bob() -> User {
    User::authenticated("bob", false)
}

const UPDATE_ROADS: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:Transaction service="WFS" version="1.0.0"
    xmlns:wfs="http://www.opengis.net/wfs" xmlns:ogc="http://www.opengis.net/ogc">
  <wfs:Update typeName="public:roads">
    <wfs:Property><wfs:Name>surface</wfs:Name><wfs:Value>gravel</wfs:Value></wfs:Property>
    <ogc:Filter><ogc:FeatureId fid="roads.7"/></ogc:Filter>
  </wfs:Update>
</wfs:Transaction>"#;

const INSERT_PARCELS: &[u8] = br#"<wfs:Transaction service="WFS" version="1.0.0"
    xmlns:wfs="http://www.opengis.net/wfs" xmlns:public="http://example.org/public">
  <wfs:Insert>
    <public:parcels><public:owner>Smith</public:owner></public:parcels>
  </wfs:Insert>
</wfs:Transaction>"#;

#[tokio::test]
async fn authorized_transaction_is_forwarded_verbatim() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let response = gateway
        .handle(
            &roads(),
            &bob(),
            request(Method::POST, "SERVICE=WFS&REQUEST=Transaction&MAP=/etc/passwd", UPDATE_ROADS),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"<ServiceExceptionReport/>");

    let log = log.lock();
    assert_eq!(log.len(), 1);
    let seen = &log[0];
    assert_eq!(seen.method, Method::POST);
    assert_eq!(&seen.body[..], UPDATE_ROADS);
    assert_eq!(seen.param("MAP"), Some("/srv/maps/alice/roads/roads.qgs"));
    assert_eq!(seen.param("SERVICE"), Some("WFS"));
    assert_eq!(seen.query.iter().filter(|(k, _)| k.eq_ignore_ascii_case("map")).count(), 1);
    assert!(!seen.authorization);
    assert!(seen.user_agent.as_deref().unwrap_or("").is_empty());
}

#[tokio::test]
async fn unauthorized_insert_never_reaches_renderer() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(&roads(), &bob(), request(Method::POST, "SERVICE=WFS", INSERT_PARCELS))
        .await
        .unwrap_err();
    match err {
        GatewayError::Forbidden { action, layer } => {
            assert_eq!(action, EditAction::Insert);
            assert_eq!(layer, "parcels");
        }
        other => panic!("expected Forbidden, got {other:?}"),
    }
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn transaction_body_is_authorized_whatever_the_query_says() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    for query in [
        "SERVICE=WFS&REQUEST=GetFeature",
        "SERVICE=WMS&REQUEST=GetMap",
        "REQUEST=DescribeFeatureType",
        "",
    ] {
        let err = gateway
            .handle(&roads(), &bob(), request(Method::POST, query, INSERT_PARCELS))
            .await
            .unwrap_err();
        assert!(
            matches!(err, GatewayError::Forbidden { action: EditAction::Insert, .. }),
            "{query}: {err:?}"
        );
    }
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn form_encoded_transaction_is_authorized() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(
            &roads(),
            &bob(),
            request(
                Method::POST,
                "SERVICE=WMS&REQUEST=GetMap",
                b"SERVICE=WFS&REQUEST=Transaction&OPERATION=Delete&TYPENAME=parcels",
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Forbidden { action: EditAction::Delete, .. }
    ));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn kvp_delete_is_authorized_from_query() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(
            &roads(),
            &bob(),
            request(
                Method::GET,
                "SERVICE=WFS&REQUEST=Transaction&OPERATION=Delete&TYPENAME=parcels&FEATUREID=parcels.1",
                b"",
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Forbidden { action: EditAction::Delete, .. }
    ));

    gateway
        .handle(
            &roads(),
            &bob(),
            request(
                Method::GET,
                "SERVICE=WFS&REQUEST=Transaction&OPERATION=Delete&TYPENAME=roads&FEATUREID=roads.1",
                b"",
            ),
        )
        .await
        .unwrap();
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn read_requests_pass_through() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let response = gateway
        .handle(
            &roads(),
            &User::anonymous(),
            request(Method::GET, "SERVICE=WMS&REQUEST=GetCapabilities", b""),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].method, Method::GET);
    assert_eq!(log[0].param("REQUEST"), Some("GetCapabilities"));
    assert!(log[0].body.is_empty());
}

#[tokio::test]
async fn malformed_transaction_is_rejected() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(
            &roads(),
            &bob(),
            request(
                Method::POST,
                "SERVICE=WFS&REQUEST=Transaction",
                b"<wfs:Transaction><wfs:Insert></wfs:Transaction>",
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Parse(_)), "{err:?}");
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn malformed_body_under_read_request_is_rejected() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(
            &roads(),
            &bob(),
            request(
                Method::POST,
                "SERVICE=WMS&REQUEST=GetMap",
                b"<wfs:Transaction><wfs:Insert></wfs:Transaction>",
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Parse(_)), "{err:?}");
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn preview_reaches_unpublished_projects() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;
    let draft = ProjectKey::new("alice", "draft").unwrap();

    let response = gateway
        .preview(
            &draft,
            request(Method::GET, "SERVICE=WMS&REQUEST=GetMap&MAP=/etc/passwd", b""),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // owners edit their own drafts without layer checks
    gateway
        .preview(&draft, request(Method::POST, "SERVICE=WFS", INSERT_PARCELS))
        .await
        .unwrap();

    let err = gateway
        .preview(
            &ProjectKey::new("alice", "rivers").unwrap(),
            request(Method::GET, "SERVICE=WMS&REQUEST=GetMap", b""),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));

    let log = log.lock();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].param("MAP"), Some("/srv/maps/alice/draft/roads.qgs"));
    assert_eq!(&log[1].body[..], INSERT_PARCELS);
}

#[tokio::test]
async fn unpublished_and_missing_projects() {
    let (addr, log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(
            &ProjectKey::new("alice", "draft").unwrap(),
            &bob(),
            request(Method::GET, "SERVICE=WMS&REQUEST=GetMap", b""),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotPublished(_)));

    let err = gateway
        .handle(
            &ProjectKey::new("alice", "rivers").unwrap(),
            &bob(),
            request(Method::GET, "SERVICE=WMS&REQUEST=GetMap", b""),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn renderer_client_error_keeps_status() {
    let (addr, _log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    let err = gateway
        .handle(
            &roads(),
            &bob(),
            request(Method::GET, "SERVICE=WMS&REQUEST=Bogus", b""),
        )
        .await
        .unwrap_err();
    match err {
        GatewayError::Upstream { status, message } => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(message, "unknown request");
        }
        other => panic!("expected Upstream, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_renderer_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = gateway(format!("http://{addr}/ows/")).await;
    let err = gateway
        .handle(
            &roads(),
            &bob(),
            request(Method::GET, "SERVICE=WMS&REQUEST=GetCapabilities", b""),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Upstream { status: StatusCode::BAD_GATEWAY, .. }
    ));
}

#[tokio::test]
async fn reload_posts_project_path() {
    let (addr, _log) = spawn_renderer().await;
    let gateway = gateway(format!("http://{addr}/ows/")).await;

    // reload works for unpublished projects too
    let map = gateway
        .project_map(&ProjectKey::new("alice", "draft").unwrap())
        .await
        .unwrap();
    assert_eq!(map, "/srv/maps/alice/draft/roads.qgs");
    gateway.proxy().reload(&map).await.unwrap();
}
