// Integration tests for `HomeConnectClient` using wiremock.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homeconnect_api::AbsoluteToken;
use homeconnect_api::auth::TokenMap;
use homeconnect_api::transport::VENDOR_JSON;
use homeconnect_core::{
    AuthConfig, ClientConfig, CoreError, Endpoint, EventKind, Group, HomeConnectClient, Item,
    MemoryTokenStore,
};

const CLIENT_ID: &str = "0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF";
const HA_ID: &str = "SIEMENS-HCS02DWH1-6F2FC400C1EA4A";

// ── Helpers ─────────────────────────────────────────────────────────

fn store() -> Arc<MemoryTokenStore> {
    let token = AbsoluteToken {
        refresh_token: "saved-refresh".into(),
        access_token: "saved-access".into(),
        access_expires_at: Utc::now().timestamp_millis() + 24 * 60 * 60 * 1000,
        scopes: vec!["IdentifyAppliance".into(), "Monitor".into()],
    };
    let mut tokens = TokenMap::new();
    tokens.insert(CLIENT_ID.into(), token);
    Arc::new(MemoryTokenStore::with_tokens(tokens))
}

async fn setup() -> (MockServer, HomeConnectClient) {
    let server = MockServer::start().await;
    let mut config = ClientConfig::new(Endpoint::Simulator, AuthConfig::new(CLIENT_ID)).unwrap();
    config.transport.base_url = url::Url::parse(&server.uri()).unwrap();
    config.events.grace_window = Duration::from_millis(200);

    let client = HomeConnectClient::new(config, store()).unwrap();
    client.start().await;
    (server, client)
}

fn vendor_json(body: &serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), VENDOR_JSON)
}

// ── Validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_wrong_type_is_flagged_but_returned_unchanged() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("/api/homeappliances/{HA_ID}/status")))
        .and(header("authorization", "Bearer saved-access"))
        .respond_with(vendor_json(&json!({ "data": { "status": [
            { "key": "BSH.Common.Status.DoorState", "value": true },
            { "key": "BSH.Common.Status.OperationState", "value": "BSH.Common.EnumType.OperationState.Ready" }
        ]}})))
        .expect(1)
        .mount(&server)
        .await;

    let status = client.status(HA_ID).await.unwrap();

    assert_eq!(status.len(), 2);
    assert_eq!(status[0].as_bool(), Some(true));

    let pending = client.reporter().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].group, Group::Status);
    assert_eq!(pending[0].key, "BSH.Common.Status.DoorState");

    client.shutdown().await;
}

// ── Programs ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_active_program_is_none() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path(format!("/api/homeappliances/{HA_ID}/programs/active")))
        .respond_with(ResponseTemplate::new(404).set_body_raw(
            r#"{"error":{"key":"SDK.Error.NoProgramActive","description":"There is no program active"}}"#,
            VENDOR_JSON,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/homeappliances/{HA_ID}/programs/selected")))
        .respond_with(ResponseTemplate::new(409).set_body_raw(
            r#"{"error":{"key":"SDK.Error.WrongOperationState"}}"#,
            VENDOR_JSON,
        ))
        .mount(&server)
        .await;

    assert_eq!(client.active_program(HA_ID).await.unwrap(), None);

    let err = client.selected_program(HA_ID).await.unwrap_err();
    assert!(matches!(err, CoreError::Rejected { status: 409, .. }));
    assert_eq!(err.code(), Some("SDK.Error.WrongOperationState"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_start_program_sends_options() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path(format!("/api/homeappliances/{HA_ID}/programs/active")))
        .and(header("content-type", VENDOR_JSON))
        .and(body_json(json!({ "data": {
            "key": "Dishcare.Dishwasher.Program.Eco50",
            "options": [ { "key": "BSH.Common.Option.StartInRelative", "value": 600 } ]
        }})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .start_program(
            HA_ID,
            "Dishcare.Dishwasher.Program.Eco50",
            &[Item::new("BSH.Common.Option.StartInRelative", json!(600))],
        )
        .await
        .unwrap();

    client.shutdown().await;
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_are_broadcast_then_disconnect_after_grace() {
    let (server, client) = setup().await;

    let body = format!(
        "event: KEEP-ALIVE\n\n\
         event: STATUS\nid: {HA_ID}\n\
         data: {{\"items\":[{{\"key\":\"BSH.Common.Status.DoorState\",\"value\":\"BSH.Common.EnumType.DoorState.Open\"}}]}}\n\n"
    );
    Mock::given(method("GET"))
        .and(path("/api/homeappliances/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/homeappliances/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut events = client.event_stream();
    client.start_events().await;

    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind, EventKind::Status);
    assert_eq!(first.ha_id, HA_ID);
    assert_eq!(first.items[0].key, "BSH.Common.Status.DoorState");

    // The stream ended and reconnects keep failing: past the grace
    // window the appliance is reported disconnected.
    let second = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.kind, EventKind::Disconnected);
    assert_eq!(second.ha_id, HA_ID);

    client.shutdown().await;
}
