//! HTTP surface tests: /v1/invoke and the admin API.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use integration_gateway::auth::InMemoryCredentialStore;
use integration_gateway::config::{GatewayConfig, ProviderConfig};
use integration_gateway::lifecycle::{Gateway, Shutdown};
use integration_gateway::HttpServer;

mod common;
use common::{gateway_config, MockResponse, MockUpstream};

const ADMIN_KEY: &str = "test-admin-key";
const CALLER_KEY: &str = "test-caller-key";

struct RunningGateway {
    addr: SocketAddr,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), std::io::Error>>,
}

impl RunningGateway {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start_gateway(mut config: GatewayConfig) -> RunningGateway {
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.invoke.api_keys = vec![CALLER_KEY.into()];

    let gateway = Gateway::build(config, Arc::new(InMemoryCredentialStore::new(None))).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(&gateway);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    RunningGateway { addr, shutdown, handle }
}

async fn crm_gateway() -> (MockUpstream, RunningGateway) {
    let upstream = MockUpstream::start(|req| {
        if req.path == "/v1/missing" {
            MockResponse::json(404, json!({ "message": "gone" }))
        } else {
            MockResponse::json(200, json!({ "path": req.path }))
        }
    })
    .await;
    let gateway = start_gateway(gateway_config(ProviderConfig::new("crm", upstream.url()))).await;
    (upstream, gateway)
}

#[tokio::test]
async fn test_admin_requires_api_key() {
    let (_upstream, gateway) = crm_gateway().await;
    let client = reqwest::Client::new();

    let res = client.get(gateway.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(gateway.url("/admin/status"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");
    assert_eq!(body["providers"], json!(["crm"]));
}

#[tokio::test]
async fn test_invoke_requires_caller_key() {
    let (upstream, gateway) = crm_gateway().await;
    let client = reqwest::Client::new();
    let descriptor = json!({
        "provider": "crm",
        "userId": "someone-else",
        "path": "/v1/contacts",
        "operation": "list_contacts"
    });

    let res = client.post(gateway.url("/v1/invoke")).json(&descriptor).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // The admin key is not a caller key.
    for key in ["wrong", ADMIN_KEY] {
        let res = client
            .post(gateway.url("/v1/invoke"))
            .bearer_auth(key)
            .json(&descriptor)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
    assert_eq!(upstream.hits(), 0);

    let res = client
        .post(gateway.url("/v1/invoke"))
        .bearer_auth(CALLER_KEY)
        .json(&descriptor)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_invoke_runs_descriptor() {
    let (upstream, gateway) = crm_gateway().await;
    let client = reqwest::Client::new();

    let res = client
        .post(gateway.url("/v1/invoke"))
        .bearer_auth(CALLER_KEY)
        .json(&json!({
            "provider": "crm",
            "userId": "u1",
            "path": "/v1/contacts",
            "operation": "list_contacts",
            "method": "GET",
            "cacheOptions": { "enabled": true }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["path"], "/v1/contacts");
    assert_eq!(body["cached"], false);
    assert_eq!(upstream.hits(), 1);

    let cache: Value = client
        .get(gateway.url("/admin/cache"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cache["crm"]["size"], 1);

    // Disconnecting the user also drops their cached reads.
    let body: Value = client
        .delete(gateway.url("/admin/tokens/crm/u1"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["purgedCacheEntries"], 1);
}

#[tokio::test]
async fn test_invoke_maps_upstream_errors() {
    let (_upstream, gateway) = crm_gateway().await;
    let client = reqwest::Client::new();

    let res = client
        .post(gateway.url("/v1/invoke"))
        .bearer_auth(CALLER_KEY)
        .json(&json!({
            "provider": "crm",
            "userId": "u1",
            "path": "/v1/missing",
            "operation": "get_contact"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], "gone");
    assert_eq!(body["reconnectRequired"], false);
}

#[tokio::test]
async fn test_circuit_and_cache_controls() {
    let (_upstream, gateway) = crm_gateway().await;
    let client = reqwest::Client::new();

    client
        .post(gateway.url("/v1/invoke"))
        .bearer_auth(CALLER_KEY)
        .json(&json!({
            "provider": "crm",
            "userId": "u1",
            "path": "/v1/contacts",
            "operation": "list_contacts"
        }))
        .send()
        .await
        .unwrap();

    let circuits: Value = client
        .get(gateway.url("/admin/circuits"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(circuits["crm:list_contacts"]["state"], "CLOSED");

    let reset = |path: &str| client.post(gateway.url(path)).bearer_auth(ADMIN_KEY).send();
    assert_eq!(reset("/admin/circuits/crm:list_contacts/reset").await.unwrap().status(), StatusCode::OK);
    assert_eq!(reset("/admin/circuits/crm:unknown/reset").await.unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(reset("/admin/circuits/reset").await.unwrap().status(), StatusCode::OK);
    assert_eq!(reset("/admin/cache/crm/clear").await.unwrap().status(), StatusCode::OK);
    assert_eq!(reset("/admin/cache/nope/clear").await.unwrap().status(), StatusCode::NOT_FOUND);

    let limits: Value = client
        .get(gateway.url("/admin/limits"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(limits["crm:u1"]["provider"], "crm");

    let res = client
        .delete(gateway.url("/admin/tokens/crm/u1"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["invalidated"], false);
}

#[tokio::test]
async fn test_graceful_shutdown_stops_server() {
    let gateway = start_gateway(GatewayConfig::default()).await;
    let res = reqwest::get(gateway.url("/health")).await.unwrap();
    assert_eq!(res.text().await.unwrap(), "ok");

    gateway.shutdown.trigger();
    let result = tokio::time::timeout(std::time::Duration::from_secs(5), gateway.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
