//! Webhook endpoint integration tests

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wa_ingest::DbPool;
use wa_ingest::db::{ContactRepo, ConversationRepo, MessageRepo};

mod common;
use common::{build_test_router, build_test_router_with, create_test_instance, setup_test_db};

async fn post_json(db: &DbPool, uri: &str, body: &Value) -> (StatusCode, Value) {
    send_json(build_test_router(db.clone()), uri, body).await
}

async fn send_json(router: axum::Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn first_delivery() -> Value {
    json!({
        "message": {
            "sender": "5511988887777@s.whatsapp.net",
            "fromMe": false,
            "messageType": "conversation",
            "text": "Olá",
            "id": "MSG1"
        },
        "instanceName": "inst-1"
    })
}

#[tokio::test]
async fn test_first_and_repeated_delivery() {
    let db = setup_test_db();
    let instance = create_test_instance(&db, "Acme", "inst-1");

    let (status, first) = post_json(&db, "/webhook", &first_delivery()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    let message_id = first["message_id"].as_str().unwrap().to_string();

    let contact = ContactRepo::new(db.clone())
        .find(&instance.company_id, "5511988887777")
        .unwrap()
        .unwrap();
    assert_eq!(contact.id, first["contact_id"]);

    let conversation = ConversationRepo::new(db.clone())
        .find(&instance.company_id, "5511988887777")
        .unwrap()
        .unwrap();
    assert_eq!(conversation.id, first["conversation_id"]);
    assert_eq!(conversation.contact_id, contact.id);
    assert_eq!(conversation.instance_id, instance.instance_id);

    let messages = MessageRepo::new(db.clone());
    let stored = messages.find_by_provider_id("MSG1").unwrap().unwrap();
    assert_eq!(stored.id, message_id);
    assert_eq!(stored.direction.as_str(), "inbound");
    assert_eq!(stored.content, "Olá");

    let (status, second) = post_json(&db, "/webhook", &first_delivery()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["success"], true);
    assert_eq!(second["duplicate"], true);
    assert_eq!(second["message_id"], message_id.as_str());
    assert_eq!(messages.count().unwrap(), 1);
}

#[tokio::test]
async fn test_envelope_shapes_land_in_one_conversation() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let event = |id: &str| {
        json!({
            "EventType": "messages",
            "instanceName": "inst-1",
            "message": {
                "sender": "5511988887777@s.whatsapp.net",
                "messageType": "conversation",
                "text": "hi",
                "messageid": id
            }
        })
    };

    let (_, direct) = post_json(&db, "/webhook", &event("A")).await;
    let (_, wrapped) = post_json(&db, "/webhook", &json!({ "body": event("B") })).await;
    let (_, batched) = post_json(&db, "/webhook", &json!([{ "body": event("C") }])).await;

    for response in [&direct, &wrapped, &batched] {
        assert_eq!(response["success"], true, "{response}");
        assert_eq!(response["conversation_id"], direct["conversation_id"]);
    }
    assert_eq!(MessageRepo::new(db).count().unwrap(), 3);
}

#[tokio::test]
async fn test_sub_path_and_instance_header() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let mut body = first_delivery();
    body.as_object_mut().unwrap().remove("instanceName");

    let response = build_test_router(db.clone())
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhook/messages/upsert")
                .header("x-instance-name", "inst-1")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn test_any_path_reaches_webhook() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let mut second = first_delivery();
    second["message"]["id"] = json!("MSG2");

    let (status, root) = post_json(&db, "/", &first_delivery()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(root["success"], true, "{root}");

    let (status, other) = post_json(&db, "/uazapi", &second).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(other["success"], true, "{other}");
    assert_eq!(other["conversation_id"], root["conversation_id"]);

    assert_eq!(MessageRepo::new(db).count().unwrap(), 2);
}

#[tokio::test]
async fn test_large_delivery_is_accepted() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let mut body = first_delivery();
    body["message"]["text"] = json!("a".repeat(3 * 1024 * 1024));

    let (status, json) = post_json(&db, "/webhook", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(MessageRepo::new(db).count().unwrap(), 1);
}

#[tokio::test]
async fn test_oversized_delivery_answers_ok() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let mut body = first_delivery();
    body["message"]["text"] = json!("a".repeat(4096));

    let router = build_test_router_with(db.clone(), |builder| builder.max_body_bytes(1024));
    let (status, json) = send_json(router, "/webhook", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "unrecognized_payload");
    assert_eq!(json["stage"], "received");
    assert_eq!(MessageRepo::new(db).count().unwrap(), 0);
}

#[tokio::test]
async fn test_group_message_is_filtered() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let mut body = first_delivery();
    body["message"]["isGroup"] = json!(true);

    let (status, json) = post_json(&db, "/webhook", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["filtered"], true);
    assert_eq!(json["reason"], "group_message");

    // Group events without an id are still filtered, not failed
    body["message"].as_object_mut().unwrap().remove("id");
    let (status, json) = post_json(&db, "/webhook", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["filtered"], true);
    assert_eq!(json["reason"], "group_message");

    assert_eq!(MessageRepo::new(db).count().unwrap(), 0);
}

#[tokio::test]
async fn test_failures_answer_ok_with_error_body() {
    let db = setup_test_db();
    create_test_instance(&db, "Acme", "inst-1");

    let mut unknown = first_delivery();
    unknown["instanceName"] = json!("ghost");
    let (status, json) = post_json(&db, "/webhook", &unknown).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "instance_not_found");

    let mut short = first_delivery();
    short["message"]["sender"] = json!("123456789@s.whatsapp.net");
    let (_, json) = post_json(&db, "/webhook", &short).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "invalid_phone_number");

    let (_, json) = post_json(&db, "/webhook", &json!({ "instanceName": "inst-1" })).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "unrecognized_payload");

    assert_eq!(MessageRepo::new(db).count().unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_json_is_unrecognized() {
    let db = setup_test_db();

    let response = build_test_router(db)
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhook")
                .body(Body::from("{ nope"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "unrecognized_payload");
}

#[tokio::test]
async fn test_options_and_other_methods() {
    let db = setup_test_db();

    let options = build_test_router(db.clone())
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/webhook")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(options.status(), StatusCode::OK);

    let preflight = build_test_router(db.clone())
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/webhook")
                .header(header::ORIGIN, "https://console.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(preflight.status(), StatusCode::OK);
    assert!(
        preflight
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );

    let get = build_test_router(db)
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/webhook")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_and_ready() {
    let db = setup_test_db();

    for uri in ["/health", "/ready"] {
        let response = build_test_router(db.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }
}
