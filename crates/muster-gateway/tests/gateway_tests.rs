//! Gateway fan-out and HTTP surface tests — no network, events are injected
//! through the same delivery path the connection tasks use.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

use muster_core::{ConnectionState, InboundEvent};
use muster_gateway::{http::build_router, Gateway, GatewayConfig};

fn gateway_with(buffer: usize) -> Gateway {
    Gateway::new(GatewayConfig {
        event_buffer: buffer,
        ..Default::default()
    })
}

fn event(bot: &str, n: usize) -> InboundEvent {
    InboundEvent {
        bot: bot.into(),
        channel_id: "c1".into(),
        thread_id: None,
        message_id: format!("m{n}"),
        author_id: "u1".into(),
        author_name: "alice".into(),
        is_bot_author: false,
        content: format!("message {n}"),
        attachments: vec![],
        timestamp: Utc::now(),
    }
}

async fn body_string(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Registration ───────────────────────────────────────────────

#[tokio::test]
async fn duplicate_token_is_rejected() {
    let gateway = gateway_with(16);
    gateway.register("a1", "token-x").unwrap();
    let err = gateway.register("a2", "token-x").unwrap_err();
    assert_eq!(err.kind(), "duplicate_bot_token");

    // Distinct tokens are fine; re-registering a name is not.
    gateway.register("a2", "token-y").unwrap();
    assert!(gateway.register("a2", "token-z").is_err());
}

#[tokio::test]
async fn registered_identity_starts_initializing() {
    let gateway = gateway_with(16);
    gateway.register("a1", "t1").unwrap();
    assert_eq!(
        gateway.connection_state("a1"),
        Some(ConnectionState::Initializing)
    );
    assert_eq!(gateway.connection_state("nope"), None);
    assert!(gateway.bot_user_id("a1").is_none());
}

// ── Fan-out ────────────────────────────────────────────────────

#[tokio::test]
async fn every_subscriber_receives_every_event() {
    let gateway = gateway_with(16);
    gateway.register("b1", "t1").unwrap();
    gateway.register("b2", "t2").unwrap();

    let mut s1 = gateway.subscribe("b1").unwrap();
    let mut s2 = gateway.subscribe("b1").unwrap();
    let mut other = gateway.subscribe("b2").unwrap();

    gateway.deliver(event("b1", 1)).unwrap();

    let e1 = s1.next().await.unwrap();
    let e2 = s2.next().await.unwrap();
    assert_eq!(e1.content, "message 1");
    assert_eq!(e2.content, "message 1");
    assert_eq!(e1.message_id, e2.message_id);

    // Cross-bot isolation: a subscriber of b2 never sees b1 traffic.
    assert!(other.try_next().is_none());
}

#[tokio::test]
async fn events_arrive_in_receive_order() {
    let gateway = gateway_with(64);
    gateway.register("b1", "t1").unwrap();
    let mut sub = gateway.subscribe("b1").unwrap();

    for n in 0..10 {
        gateway.deliver(event("b1", n)).unwrap();
    }
    let mut seen = Vec::new();
    while let Some(ev) = sub.try_next() {
        seen.push(ev.message_id);
    }
    let expected: Vec<String> = (0..10).map(|n| format!("m{n}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn slow_subscriber_loses_oldest_and_loss_is_counted() {
    let gateway = gateway_with(4);
    gateway.register("b1", "t1").unwrap();
    let mut sub = gateway.subscribe("b1").unwrap();

    for n in 0..10 {
        gateway.deliver(event("b1", n)).unwrap();
    }

    let mut seen = Vec::new();
    while let Some(ev) = sub.try_next() {
        seen.push(ev.message_id);
    }
    // The newest events survive; the tail is intact and ordered.
    assert!(!seen.is_empty());
    assert!(seen.len() <= 4);
    assert_eq!(seen.last().unwrap(), "m9");

    let dropped: u64 = gateway
        .bots()
        .iter()
        .find(|b| b.id == "b1")
        .unwrap()
        .dropped_events;
    assert_eq!(dropped as usize + seen.len(), 10);
}

#[tokio::test]
async fn deliver_to_unknown_bot_fails() {
    let gateway = gateway_with(4);
    let err = gateway.deliver(event("ghost", 0)).unwrap_err();
    assert_eq!(err.kind(), "unknown_bot");
}

// ── HTTP surface ───────────────────────────────────────────────

#[tokio::test]
async fn bots_endpoint_lists_identities() {
    let gateway = gateway_with(16);
    gateway.register("a1", "t1").unwrap();
    gateway.register("a2", "t2").unwrap();
    let app = build_router(gateway);

    let resp = app
        .oneshot(Request::get("/bots").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    let bots = json["bots"].as_array().unwrap();
    assert_eq!(bots.len(), 2);
    assert_eq!(bots[0]["id"], "a1");
    assert_eq!(bots[0]["state"], "initializing");
}

#[tokio::test]
async fn health_reports_per_identity_state_and_drops() {
    let gateway = gateway_with(16);
    gateway.register("a1", "t1").unwrap();
    let app = build_router(gateway);

    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["ok"], false); // nothing is ready yet
    assert_eq!(json["bots"][0]["dropped_events"], 0);
}

#[tokio::test]
async fn send_to_unknown_bot_is_404_with_error_body() {
    let gateway = gateway_with(16);
    let app = build_router(gateway);

    let resp = app
        .oneshot(
            Request::post("/send")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"bot":"ghost","channel_id":"c1","content":"hi"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["error_kind"], "unknown_bot");
    assert!(json["message"].as_str().unwrap().contains("ghost"));
}

#[tokio::test]
async fn send_to_unready_identity_is_503() {
    let gateway = gateway_with(16);
    gateway.register("a1", "t1").unwrap();
    let app = build_router(gateway);

    let resp = app
        .oneshot(
            Request::post("/send")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"bot":"a1","channel_id":"c1","content":"hi"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
    assert_eq!(json["error_kind"], "transport");
}

#[tokio::test]
async fn malformed_send_body_is_a_client_error() {
    let gateway = gateway_with(16);
    let app = build_router(gateway);

    let resp = app
        .oneshot(
            Request::post("/send")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"bot":"a1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn send_file_validates_bot_before_payload() {
    let gateway = gateway_with(16);
    gateway.register("a1", "t1").unwrap();
    let app = build_router(gateway);

    let resp = app
        .oneshot(
            Request::post("/send-file")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"bot":"ghost","channel_id":"c1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── In-process fail-fast ───────────────────────────────────────

#[tokio::test]
async fn outbound_send_fails_fast_when_not_ready() {
    let gateway = gateway_with(16);
    gateway.register("a1", "t1").unwrap();
    let err = gateway.send("a1", "c1", "hello", None).await.unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert!(err.to_string().contains("not ready"));
}
