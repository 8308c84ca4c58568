//! Common test utilities for E2E tests
//!
//! [`TestServer`] runs the application on a loopback port. [`FakeRemote`]
//! plays a second instance hosting `bob`, with a real keypair, an outbox
//! and an inbox that records deliveries.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use aervyn::{AppState, config};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
    routing::{get, post},
};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const ACTIVITY_JSON: &str = "application/activity+json";

/// `(PKCS#8 private PEM, SPKI public PEM)`
pub fn generate_keypair() -> (String, String) {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    (
        private_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        public_key.to_public_key_pem(LineEnding::LF).unwrap(),
    )
}

/// Test server instance
pub struct TestServer {
    /// `host:port`, also the configured server domain
    pub authority: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Actor URIs embed the port, so bind before building the config.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let authority = format!("127.0.0.1:{}", addr.port());

        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: addr.port(),
                domain: authority.clone(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            admin: config::AdminConfig {
                username: "alice".to_string(),
                display_name: "Alice".to_string(),
                summary: Some("Test account".to_string()),
                key_bits: 1024,
            },
            federation: config::FederationConfig {
                skip_signature_verification: false,
                insecure_transport: true,
                fetch_timeout_secs: 5,
                max_concurrent_fetches: 4,
                max_date_skew_secs: 300,
                user_agent: "Aervyn/test".to_string(),
            },
            timeline: config::TimelineConfig {
                local_limit: 50,
                following_local_limit: 200,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        aervyn::metrics::init_metrics();
        let state = AppState::new(config).await.unwrap();
        let app = aervyn::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            authority,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.authority, path)
    }

    pub fn actor_uri(&self, username: &str) -> String {
        self.url(&format!("/users/{username}"))
    }

    /// The admin account created at startup
    pub async fn alice(&self) -> aervyn::data::User {
        self.state
            .account_service()
            .get_by_username("alice")
            .await
            .unwrap()
    }

    /// POST `activity` to `username`'s inbox, signed as `signer`
    pub async fn deliver_signed(
        &self,
        username: &str,
        activity: &Value,
        signer: &FakeRemote,
    ) -> reqwest::Response {
        let url = self.url(&format!("/users/{username}/inbox"));
        let body = serde_json::to_vec(activity).unwrap();
        let headers = aervyn::federation::sign_request(
            "POST",
            &url,
            Some(&body),
            &signer.private_key_pem,
            &signer.key_id(),
        )
        .unwrap();

        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, ACTIVITY_JSON)
            .header("date", headers.date)
            .header("signature", headers.signature);
        if let Some(digest) = headers.digest {
            request = request.header("digest", digest);
        }
        request.body(body).send().await.unwrap()
    }
}

/// State behind the fake remote instance
#[derive(Clone)]
struct RemoteState {
    authority: String,
    public_key_pem: String,
    outbox: Arc<Mutex<Vec<Value>>>,
    received: Arc<Mutex<Vec<Value>>>,
}

impl RemoteState {
    fn actor(&self) -> String {
        format!("http://{}/users/bob", self.authority)
    }
}

/// A second instance hosting the actor `bob`
pub struct FakeRemote {
    pub authority: String,
    pub private_key_pem: String,
    state: RemoteState,
}

impl FakeRemote {
    pub async fn start() -> Self {
        let (private_key_pem, public_key_pem) = generate_keypair();

        // The router needs the port, so reserve it first.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let authority = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

        let state = RemoteState {
            authority: authority.clone(),
            public_key_pem,
            outbox: Arc::new(Mutex::new(Vec::new())),
            received: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/.well-known/webfinger", get(remote_webfinger))
            .route("/users/bob", get(remote_actor))
            .route("/users/bob/outbox", get(remote_outbox))
            .route("/users/bob/outbox/page/1", get(remote_outbox_page))
            .route("/users/bob/inbox", post(remote_inbox))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            authority,
            private_key_pem,
            state,
        }
    }

    pub fn actor(&self) -> String {
        self.state.actor()
    }

    pub fn key_id(&self) -> String {
        format!("{}#main-key", self.actor())
    }

    pub fn handle(&self) -> String {
        format!("bob@{}", self.authority)
    }

    /// Publish a Note in bob's outbox
    pub fn publish(&self, id: &str, content: &str, published: &str, in_reply_to: Option<&str>) {
        let note = json!({
            "type": "Note",
            "id": id,
            "attributedTo": self.actor(),
            "content": content,
            "published": published,
            "inReplyTo": in_reply_to
        });
        let create = json!({
            "type": "Create",
            "id": format!("{id}/activity"),
            "actor": self.actor(),
            "object": note
        });
        self.state.outbox.lock().unwrap().insert(0, create);
    }

    /// Activities delivered to bob's inbox so far
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn remote_webfinger(State(state): State<RemoteState>) -> impl IntoResponse {
    Json(json!({
        "subject": format!("acct:bob@{}", state.authority),
        "links": [
            {"rel": "http://webfinger.net/rel/profile-page", "type": "text/html", "href": state.actor()},
            {"rel": "self", "type": ACTIVITY_JSON, "href": state.actor()}
        ]
    }))
}

async fn remote_actor(State(state): State<RemoteState>) -> impl IntoResponse {
    let actor = state.actor();
    (
        [(CONTENT_TYPE, ACTIVITY_JSON)],
        Json(json!({
            "@context": ["https://www.w3.org/ns/activitystreams", "https://w3id.org/security/v1"],
            "type": "Person",
            "id": actor,
            "preferredUsername": "bob",
            "name": "Bob",
            "inbox": format!("{actor}/inbox"),
            "outbox": format!("{actor}/outbox"),
            "publicKey": {
                "id": format!("{actor}#main-key"),
                "owner": actor,
                "publicKeyPem": state.public_key_pem
            }
        })),
    )
}

async fn remote_outbox(State(state): State<RemoteState>) -> impl IntoResponse {
    let actor = state.actor();
    let total = state.outbox.lock().unwrap().len();
    Json(json!({
        "type": "OrderedCollection",
        "id": format!("{actor}/outbox"),
        "totalItems": total,
        "first": format!("{actor}/outbox/page/1")
    }))
}

async fn remote_outbox_page(State(state): State<RemoteState>) -> impl IntoResponse {
    let actor = state.actor();
    let items = state.outbox.lock().unwrap().clone();
    Json(json!({
        "type": "OrderedCollectionPage",
        "id": format!("{actor}/outbox/page/1"),
        "partOf": format!("{actor}/outbox"),
        "orderedItems": items
    }))
}

async fn remote_inbox(State(state): State<RemoteState>, body: Bytes) -> StatusCode {
    match serde_json::from_slice::<Value>(&body) {
        Ok(activity) => {
            state.received.lock().unwrap().push(activity);
            StatusCode::ACCEPTED
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}
