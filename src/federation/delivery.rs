//! Activity delivery
//!
//! Handles delivering activities to remote servers.

use crate::data::User;
use crate::error::AppError;
use crate::metrics::ACTIVITIES_SENT;

use super::client::FederationClient;

/// Activity delivery service
///
/// Signs activities with the sender's key and POSTs them to a remote
/// inbox. Each delivery is a single attempt.
#[derive(Clone)]
pub struct ActivityDelivery {
    client: FederationClient,
}

impl ActivityDelivery {
    /// Create new delivery service
    pub fn new(client: FederationClient) -> Self {
        Self { client }
    }

    /// Deliver activity to a single inbox
    ///
    /// # Arguments
    /// * `sender` - Local user whose key signs the request
    /// * `sender_actor_uri` - Actor URI of `sender`
    /// * `inbox_uri` - Target inbox URL
    /// * `activity` - Activity JSON
    ///
    /// # Errors
    /// Returns error if delivery fails (network, signature, rejection)
    pub async fn deliver(
        &self,
        sender: &User,
        sender_actor_uri: &str,
        inbox_uri: &str,
        activity: &serde_json::Value,
    ) -> Result<(), AppError> {
        let activity_type = activity
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("Unknown")
            .to_string();

        // 1. Serialize activity
        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Validation(format!("Failed to serialize activity: {}", e)))?;

        // 2. Sign request
        let key_id = format!("{}#main-key", sender_actor_uri);
        let sig_headers = super::sign_request(
            "POST",
            inbox_uri,
            Some(&body),
            &sender.private_key_pem,
            &key_id,
        )?;

        // 3. POST to inbox with signed headers
        let result = self.client.post_activity(inbox_uri, body, &sig_headers).await;

        let status = if result.is_ok() { "success" } else { "failure" };
        ACTIVITIES_SENT
            .with_label_values(&[activity_type.as_str(), status])
            .inc();

        match &result {
            Ok(()) => tracing::info!(inbox = %inbox_uri, %activity_type, "Delivered activity"),
            Err(error) => {
                tracing::warn!(inbox = %inbox_uri, %activity_type, %error, "Activity delivery failed")
            }
        }

        result
    }
}

/// Build ActivityPub activity JSON
pub mod builder {
    use serde_json::Value;

    /// Build a Follow activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (follower)
    /// * `object` - Object URI (followee)
    pub fn follow(id: &str, actor: &str, object: &str) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Follow",
            "id": id,
            "actor": actor,
            "object": object
        })
    }

    /// Build an Undo activity
    ///
    /// # Arguments
    /// * `id` - Activity ID (unique URI)
    /// * `actor` - Actor URI (undoer)
    /// * `object` - Original activity being undone
    pub fn undo(id: &str, actor: &str, object: Value) -> Value {
        serde_json::json!({
            "@context": "https://www.w3.org/ns/activitystreams",
            "type": "Undo",
            "id": id,
            "actor": actor,
            "object": object
        })
    }
}
