//! WebFinger protocol implementation
//!
//! Used to discover ActivityPub actor URIs from addresses, and to answer
//! discovery requests for local accounts.

use serde::{Deserialize, Serialize};

use super::client::{ACTIVITY_JSON, FederationClient, JRD_JSON};
use crate::error::AppError;

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

/// WebFinger link
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// Generate WebFinger response for a local account.
///
/// # Arguments
/// * `username` - Local username
/// * `domain` - Instance domain
/// * `base_url` - Instance base URL (includes protocol)
///
/// # Returns
/// JRD with a single `self` link pointing at the actor document
pub fn build_webfinger_document(username: &str, domain: &str, base_url: &str) -> WebFingerResponse {
    let actor_url = format!("{}/users/{}", base_url.trim_end_matches('/'), username);

    WebFingerResponse {
        subject: format!("acct:{}@{}", username, domain),
        aliases: None,
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            link_type: Some(ACTIVITY_JSON.to_string()),
            href: Some(actor_url),
        }],
    }
}

/// Actor URI from the first `self` link of ActivityPub type
pub fn find_self_link(response: &WebFingerResponse) -> Option<&str> {
    response
        .links
        .iter()
        .find(|link| link.rel == "self" && link.link_type.as_deref() == Some(ACTIVITY_JSON))
        .and_then(|link| link.href.as_deref())
}

/// Split a `resource` query value into `(username, domain)`
///
/// Accepts `acct:user@domain` and bare `user@domain`.
pub fn parse_acct_resource(resource: &str) -> Option<(&str, &str)> {
    let address = resource.strip_prefix("acct:").unwrap_or(resource);
    let (username, domain) = address.split_once('@')?;
    if username.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some((username, domain))
}

/// Look up the actor URI of `local@domain`
///
/// # Errors
/// - `RemoteStatus` when the server answers with a non-success status
/// - `NotFound` when the document has no ActivityPub `self` link
pub async fn lookup_actor(
    client: &FederationClient,
    scheme: &str,
    local: &str,
    domain: &str,
) -> Result<String, AppError> {
    let url = format!(
        "{}://{}/.well-known/webfinger?resource=acct:{}@{}",
        scheme, domain, local, domain
    );

    let document = client.get_json(&url, JRD_JSON, "webfinger").await?;
    let response: WebFingerResponse = serde_json::from_value(document)
        .map_err(|e| AppError::Federation(format!("Invalid WebFinger document: {e}")))?;

    match find_self_link(&response) {
        Some(actor_uri) => {
            tracing::debug!(%local, %domain, %actor_uri, "Resolved WebFinger address");
            Ok(actor_uri.to_string())
        }
        None => Err(AppError::NotFound),
    }
}
