use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::Router;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use wgnet_common::{WgNetError, WgNetResult};
use wgnet_network::{CreateNetwork, Orchestrator};

use super::method::DriverMethod;
use super::types::{
    ActivateResponse, CapabilitiesResponse, CreateEndpointRequest, CreateEndpointResponse,
    CreateNetworkRequest, DeleteNetworkRequest, ErrorResponse, JoinRequest, JoinResponse,
};

/// Content type of every plugin protocol response.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

pub fn app(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/{method}", post(handle))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

// Docker sends its own content type, so the body is taken raw rather than
// through the Json extractor.
async fn handle(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    let method = DriverMethod::parse(&path);
    tracing::debug!(%method, body = %String::from_utf8_lossy(&body), "Request");

    match dispatch(&orchestrator, &method, &body).await {
        Ok(value) => {
            tracing::info!(%method, "Request succeeded");
            reply(StatusCode::OK, &value)
        }
        Err(e) => {
            tracing::warn!(%method, error = %e, "Request failed");
            let body = ErrorResponse { err: e.to_string() };
            reply(StatusCode::INTERNAL_SERVER_ERROR, &body)
        }
    }
}

fn reply(status: StatusCode, body: &impl serde::Serialize) -> Response {
    let body = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], body).into_response()
}

pub(crate) async fn dispatch(
    orchestrator: &Orchestrator,
    method: &DriverMethod,
    body: &[u8],
) -> WgNetResult<Value> {
    match method {
        DriverMethod::Activate => to_value(ActivateResponse::default()),
        DriverMethod::GetCapabilities => to_value(CapabilitiesResponse::default()),
        DriverMethod::CreateNetwork => {
            let req: CreateNetworkRequest = parse(body)?;
            orchestrator.create_network(CreateNetwork::from(req)).await?;
            Ok(json!({}))
        }
        DriverMethod::DeleteNetwork => {
            let req: DeleteNetworkRequest = parse(body)?;
            orchestrator.delete_network(&req.network_id).await?;
            Ok(json!({}))
        }
        DriverMethod::CreateEndpoint => {
            let req: CreateEndpointRequest = parse(body)?;
            let request = req.interface.unwrap_or_default().to_request()?;
            let iface = orchestrator
                .create_endpoint(&req.network_id, req.endpoint_id, &request)
                .await?;
            to_value(CreateEndpointResponse {
                interface: iface.into(),
            })
        }
        DriverMethod::Join => {
            let req: JoinRequest = parse(body)?;
            let info = orchestrator.join(&req.network_id, &req.endpoint_id).await?;
            to_value(JoinResponse::from(info))
        }
        DriverMethod::Unsupported(name) => Err(WgNetError::not_supported(name.as_str())),
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> WgNetResult<T> {
    serde_json::from_slice(body).map_err(|e| WgNetError::InvalidRequest {
        message: e.to_string(),
    })
}

fn to_value(body: impl serde::Serialize) -> WgNetResult<Value> {
    Ok(serde_json::to_value(body)?)
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use wgnet_common::WgNetPaths;
    use wgnet_network::{Host, NetNs};

    use super::*;

    fn orchestrator() -> Arc<Orchestrator> {
        let host = Host::with_root(WgNetPaths::new(), NetNs::current().unwrap()).unwrap();
        Arc::new(Orchestrator::new(host))
    }

    async fn call(path: &str, body: &str) -> (StatusCode, Option<String>, Value) {
        let response = handle(
            State(orchestrator()),
            Path(path.to_string()),
            Bytes::from(body.to_string()),
        )
        .await;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn activate() {
        let (status, content_type, body) = call("Plugin.Activate", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(PLUGIN_CONTENT_TYPE));
        assert_eq!(body, json!({"Implements": ["NetworkDriver"]}));
    }

    #[tokio::test]
    async fn capabilities() {
        let (status, _, body) = call("NetworkDriver.GetCapabilities", "null").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"Scope": "local", "ConnectivityScope": "local"}));
    }

    #[tokio::test]
    async fn unsupported_method() {
        let (status, _, body) = call("NetworkDriver.Leave", "{}").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"Err": "[Leave] not supported"}));
    }

    #[tokio::test]
    async fn malformed_body() {
        let (status, _, body) = call("NetworkDriver.CreateNetwork", "{not json").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["Err"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn delete_unknown_network() {
        let (status, _, body) =
            call("NetworkDriver.DeleteNetwork", r#"{"NetworkID": "abc"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"Err": "Network not found: abc"}));
    }

    #[tokio::test]
    async fn join_unknown_network() {
        let orchestrator = orchestrator();
        let err = dispatch(
            &orchestrator,
            &DriverMethod::Join,
            br#"{"NetworkID": "n", "EndpointID": "e", "SandboxKey": "/var/run/docker/netns/x"}"#,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WgNetError::NetworkNotFound { .. }));
    }

    #[tokio::test]
    async fn create_network_rejects_ipv6() {
        let body = json!({
            "NetworkID": "n",
            "Options": {"com.docker.network.generic": {"wgconf": "/etc/wg0.conf", "endpoint": "203.0.113.7"}},
            "IPv4Data": [{"Pool": "10.0.0.0/24"}],
            "IPv6Data": [{"Pool": "fd00::/64"}]
        });
        let orchestrator = orchestrator();
        let err = dispatch(
            &orchestrator,
            &DriverMethod::CreateNetwork,
            body.to_string().as_bytes(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WgNetError::InvalidRequest { .. }));
    }
}
