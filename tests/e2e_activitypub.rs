//! E2E tests for ActivityPub endpoints
//!
//! Inbound deliveries are signed by a fake remote instance whose actor
//! document the server fetches to verify them.

mod common;

use axum::http::header::CONTENT_TYPE;
use common::{ACTIVITY_JSON, FakeRemote, TestServer, generate_keypair};
use serde_json::{Value, json};

#[tokio::test]
async fn test_actor_document() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/users/alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with(ACTIVITY_JSON));

    let actor: Value = response.json().await.unwrap();
    let actor_uri = server.actor_uri("alice");
    assert_eq!(actor["type"], "Person");
    assert_eq!(actor["id"], actor_uri.as_str());
    assert_eq!(actor["preferredUsername"], "alice");
    assert_eq!(actor["name"], "Alice");
    assert_eq!(actor["inbox"], format!("{actor_uri}/inbox"));
    assert_eq!(actor["publicKey"]["id"], format!("{actor_uri}#main-key"));
    assert!(
        actor["publicKey"]["publicKeyPem"]
            .as_str()
            .unwrap()
            .contains("BEGIN PUBLIC KEY")
    );
}

#[tokio::test]
async fn test_unknown_actor_is_not_found() {
    let server = TestServer::new().await;

    for path in ["/users/nobody", "/users/nobody/outbox"] {
        let response = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 404, "path {path}");
    }
}

#[tokio::test]
async fn test_outbox_wraps_posts_in_create() {
    let server = TestServer::new().await;
    let alice = server.alice().await;
    let post = server
        .state
        .account_service()
        .publish_post(&alice, "hello fediverse", None)
        .await
        .unwrap();

    let response = server
        .client
        .get(server.url("/users/alice/outbox"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let outbox: Value = response.json().await.unwrap();
    assert_eq!(outbox["type"], "OrderedCollection");
    assert_eq!(outbox["totalItems"], 1);

    let item = &outbox["orderedItems"][0];
    assert_eq!(item["type"], "Create");
    assert_eq!(item["actor"], server.actor_uri("alice").as_str());
    assert_eq!(item["object"]["type"], "Note");
    assert_eq!(item["object"]["id"], post.id.as_str());
    assert_eq!(item["object"]["content"], "hello fediverse");
}

#[tokio::test]
async fn test_unsigned_inbox_post_is_rejected() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/users/alice/inbox"))
        .header(CONTENT_TYPE, ACTIVITY_JSON)
        .body(r#"{"id":"https://x.example/1","type":"Follow","actor":"https://x.example/u"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert!(
        server
            .state
            .db
            .get_activity("https://x.example/1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_signature_without_signature_param_is_bad_request() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;

    let response = server
        .client
        .post(server.url("/users/alice/inbox"))
        .header(CONTENT_TYPE, ACTIVITY_JSON)
        .header(
            "signature",
            format!(r#"keyId="{}",headers="(request-target) host""#, bob.key_id()),
        )
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_signed_follow_is_stored_once() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;
    let alice = server.alice().await;

    let follow = json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": format!("{}/follows/1", bob.actor()),
        "type": "Follow",
        "actor": bob.actor(),
        "object": server.actor_uri("alice")
    });

    let first = server.deliver_signed("alice", &follow, &bob).await;
    assert_eq!(first.status(), 202);
    let second = server.deliver_signed("alice", &follow, &bob).await;
    assert_eq!(second.status(), 202);

    let stored = server
        .state
        .db
        .get_activity(&format!("{}/follows/1", bob.actor()))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.processed);
    assert_eq!(stored.activity_type, "Follow");

    let pending = server
        .state
        .follow_service()
        .pending_requests(&alice)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].actor_uri, bob.actor());

    // Pending requests are not followers yet.
    let followers: Value = server
        .client
        .get(server.url("/users/alice/followers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(followers["totalItems"], 0);

    server
        .state
        .follow_service()
        .accept(&pending[0].id)
        .await
        .unwrap();
    let followers: Value = server
        .client
        .get(server.url("/users/alice/followers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(followers["totalItems"], 1);
}

#[tokio::test]
async fn test_unsupported_activity_is_accepted_and_kept_unprocessed() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;

    let arrive = json!({
        "id": format!("{}/arrive/1", bob.actor()),
        "type": "Arrive",
        "actor": bob.actor(),
        "location": format!("http://{}/places/home", bob.authority)
    });

    let response = server.deliver_signed("alice", &arrive, &bob).await;
    assert_eq!(response.status(), 202);

    let stored = server
        .state
        .db
        .get_activity(&format!("{}/arrive/1", bob.actor()))
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.processed);
    assert_eq!(stored.activity_type, "Arrive");
}

#[tokio::test]
async fn test_signature_with_wrong_key_is_rejected() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;
    let (mallory_key, _) = generate_keypair();

    let follow = json!({
        "id": format!("{}/follows/forged", bob.actor()),
        "type": "Follow",
        "actor": bob.actor(),
        "object": server.actor_uri("alice")
    });
    let url = server.url("/users/alice/inbox");
    let body = serde_json::to_vec(&follow).unwrap();
    let headers =
        aervyn::federation::sign_request("POST", &url, Some(&body), &mallory_key, &bob.key_id())
            .unwrap();

    let response = server
        .client
        .post(&url)
        .header(CONTENT_TYPE, ACTIVITY_JSON)
        .header("date", headers.date)
        .header("signature", headers.signature)
        .header("digest", headers.digest.unwrap())
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert!(
        server
            .state
            .db
            .get_activity(&format!("{}/follows/forged", bob.actor()))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_activity_actor_must_own_signing_key() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;

    let follow = json!({
        "id": "https://evil.example/follows/1",
        "type": "Follow",
        "actor": "https://evil.example/users/mallory",
        "object": server.actor_uri("alice")
    });

    let response = server.deliver_signed("alice", &follow, &bob).await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_inbox_for_unknown_user_is_not_found() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;

    let follow = json!({
        "id": format!("{}/follows/2", bob.actor()),
        "type": "Follow",
        "actor": bob.actor(),
        "object": server.actor_uri("nobody")
    });

    let response = server.deliver_signed("nobody", &follow, &bob).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_signed_create_stores_remote_post() {
    let server = TestServer::new().await;
    let bob = FakeRemote::start().await;
    let note_id = format!("{}/notes/1", bob.actor());

    let create = json!({
        "id": format!("{note_id}/activity"),
        "type": "Create",
        "actor": bob.actor(),
        "object": {
            "type": "Note",
            "id": note_id,
            "attributedTo": bob.actor(),
            "content": "<p>hi<script>alert(1)</script></p>",
            "published": "2025-01-01T12:00:00Z"
        }
    });

    let response = server.deliver_signed("alice", &create, &bob).await;
    assert_eq!(response.status(), 202);

    let post = server
        .state
        .db
        .get_post_by_uri(&note_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!post.is_local);
    assert_eq!(post.author.username, "bob");
    assert_eq!(post.author.domain, bob.authority);
    assert_eq!(post.content, "<p>hi</p>");
}
