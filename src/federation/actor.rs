//! Actor documents
//!
//! Builds the Person document served for local users and resolves remote
//! actors from `user@domain` handles.

use serde_json::{Value, json};

use super::client::{ACTIVITY_JSON, FederationClient, authority_of, parse_remote_url};
use super::webfinger;
use crate::data::User;
use crate::error::AppError;

/// What we keep from a remote actor document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorReference {
    pub id: String,
    pub preferred_username: String,
    pub name: Option<String>,
    pub summary: Option<String>,
    /// `host[:port]` of the actor id
    pub domain: String,
    pub public_key_id: Option<String>,
    pub public_key_pem: Option<String>,
    pub inbox: String,
    pub outbox: Option<String>,
}

impl ActorReference {
    /// Display handle without the leading `@`
    pub fn handle(&self) -> String {
        format!("{}@{}", self.preferred_username, self.domain)
    }
}

fn string_field(document: &Value, field: &str) -> Option<String> {
    document
        .get(field)
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

/// Decode an actor document
///
/// `id` and `inbox` are required. A missing `preferredUsername` falls back
/// to the last path segment of the id.
pub fn parse_actor_document(document: &Value) -> Result<ActorReference, AppError> {
    let id = string_field(document, "id")
        .ok_or_else(|| AppError::Federation("Actor document has no id".to_string()))?;
    let url = parse_remote_url(&id)?;
    let domain = authority_of(&url)
        .ok_or_else(|| AppError::Federation(format!("Actor id has no host: {id}")))?;

    let preferred_username = string_field(document, "preferredUsername")
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
                .filter(|segment| !segment.is_empty())
        })
        .ok_or_else(|| AppError::Federation(format!("Actor {id} has no username")))?;

    let inbox = string_field(document, "inbox")
        .ok_or_else(|| AppError::Federation(format!("Actor {id} has no inbox")))?;

    let public_key = document.get("publicKey");
    let public_key_id = public_key.and_then(|key| string_field(key, "id"));
    let public_key_pem = public_key.and_then(|key| string_field(key, "publicKeyPem"));

    Ok(ActorReference {
        id,
        preferred_username,
        name: string_field(document, "name"),
        summary: string_field(document, "summary"),
        domain,
        public_key_id,
        public_key_pem,
        inbox,
        outbox: string_field(document, "outbox"),
    })
}

/// Split a handle into `(local, domain)`
///
/// Accepts `user@domain`, `@user@domain` and `acct:user@domain`.
pub fn parse_handle(handle: &str) -> Result<(&str, &str), AppError> {
    let trimmed = handle.trim();
    let address = trimmed
        .strip_prefix("acct:")
        .unwrap_or(trimmed)
        .trim_start_matches('@');

    webfinger::parse_acct_resource(address)
        .filter(|(local, domain)| {
            !local.contains(['/', ' ', ':'])
                && !domain.contains(['/', ' ', '?', '#'])
        })
        .ok_or_else(|| AppError::Validation(format!("Malformed account handle: {handle}")))
}

/// Resolves remote actors over WebFinger and ActivityPub
#[derive(Clone)]
pub struct ActorResolver {
    client: FederationClient,
    scheme: &'static str,
}

impl ActorResolver {
    /// `scheme` is the WebFinger discovery scheme (`https` outside development)
    pub fn new(client: FederationClient, scheme: &'static str) -> Self {
        Self { client, scheme }
    }

    pub fn client(&self) -> &FederationClient {
        &self.client
    }

    /// WebFinger lookup of `local@domain`
    pub async fn lookup_actor(&self, local: &str, domain: &str) -> Result<String, AppError> {
        webfinger::lookup_actor(&self.client, self.scheme, local, domain).await
    }

    /// GET and decode the actor document at `actor_uri`
    pub async fn fetch_actor_document(&self, actor_uri: &str) -> Result<ActorReference, AppError> {
        let document = self.client.get_json(actor_uri, ACTIVITY_JSON, "actor").await?;
        parse_actor_document(&document)
    }

    /// Resolve a `user@domain` handle to its actor document
    pub async fn resolve_remote_actor(&self, handle: &str) -> Result<ActorReference, AppError> {
        let (local, domain) = parse_handle(handle)?;
        let actor_uri = self.lookup_actor(local, domain).await?;
        let actor = self.fetch_actor_document(&actor_uri).await?;

        tracing::info!(handle = %actor.handle(), actor = %actor.id, "Resolved remote actor");
        Ok(actor)
    }
}

/// Person document for a local user
pub fn build_actor_document(user: &User, base_url: &str) -> Value {
    let actor_url = format!("{}/users/{}", base_url.trim_end_matches('/'), user.username);

    json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "type": "Person",
        "id": actor_url,
        "preferredUsername": user.username,
        "name": user.display_name.clone().unwrap_or_else(|| user.username.clone()),
        "summary": user.summary.clone().unwrap_or_default(),
        "inbox": format!("{}/inbox", actor_url),
        "outbox": format!("{}/outbox", actor_url),
        "followers": format!("{}/followers", actor_url),
        "following": format!("{}/following", actor_url),
        "url": actor_url,
        "publicKey": {
            "id": format!("{}#main-key", actor_url),
            "owner": actor_url,
            "publicKeyPem": user.public_key_pem
        }
    })
}
