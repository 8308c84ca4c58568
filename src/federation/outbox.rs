//! Outbox collections
//!
//! Serves the outbox of local users and reads the outboxes of remote actors.

use serde_json::{Value, json};

use super::actor::{ActorReference, ActorResolver};
use super::activity::Note;
use super::client::ACTIVITY_JSON;
use crate::data::{AuthorRef, Post};
use crate::error::AppError;

const PUBLIC_AUDIENCE: &str = "https://www.w3.org/ns/activitystreams#Public";

/// OrderedCollection of Create activities wrapping the given posts
pub fn build_outbox_collection(actor_uri: &str, posts: &[Post]) -> Value {
    let followers = format!("{}/followers", actor_uri);

    let items: Vec<Value> = posts
        .iter()
        .map(|post| {
            let published = post.created_at.to_rfc3339();
            json!({
                "type": "Create",
                "id": format!("{}/activity", post.id),
                "actor": actor_uri,
                "published": published,
                "to": [PUBLIC_AUDIENCE],
                "cc": [followers],
                "object": {
                    "type": "Note",
                    "id": post.id,
                    "attributedTo": actor_uri,
                    "content": post.content,
                    "published": published,
                    "inReplyTo": post.reply_to_id,
                    "to": [PUBLIC_AUDIENCE],
                    "cc": [followers],
                    "likes": {"type": "Collection", "totalItems": post.like_count},
                    "shares": {"type": "Collection", "totalItems": post.boost_count},
                    "replies": {"type": "Collection", "totalItems": post.reply_count}
                }
            })
        })
        .collect();

    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "type": "OrderedCollection",
        "id": format!("{}/outbox", actor_uri),
        "totalItems": items.len(),
        "orderedItems": items
    })
}

fn collection_total(object: &Value, field: &str) -> i64 {
    object
        .get(field)
        .and_then(|collection| collection.get("totalItems"))
        .and_then(|total| total.as_i64())
        .unwrap_or(0)
}

fn items_of(page: &Value) -> Option<&Vec<Value>> {
    page.get("orderedItems")
        .or_else(|| page.get("items"))
        .and_then(|items| items.as_array())
}

/// Map outbox items to transient posts authored by `owner`
///
/// `Create` items are unwrapped; anything that is not a well-formed
/// `Note` is skipped.
pub fn extract_outbox_posts(page: &Value, owner: &ActorReference) -> Vec<Post> {
    let Some(items) = items_of(page) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let object = match item.get("type").and_then(|t| t.as_str()) {
                Some("Create") => item.get("object")?,
                _ => item,
            };
            let note = Note::from_value(object)?;
            let created_at = note.created_at();

            Some(Post {
                id: note.id,
                author: AuthorRef {
                    actor_uri: owner.id.clone(),
                    username: owner.preferred_username.clone(),
                    domain: owner.domain.clone(),
                    display_name: owner.name.clone(),
                },
                content: ammonia::clean(&note.content),
                created_at,
                reply_to_id: note.in_reply_to,
                is_local: false,
                like_count: collection_total(object, "likes"),
                boost_count: collection_total(object, "shares"),
                reply_count: collection_total(object, "replies"),
                thread: None,
            })
        })
        .collect()
}

/// Reads posts from remote outboxes
#[derive(Clone)]
pub struct RemoteTimelineFetcher {
    resolver: ActorResolver,
}

impl RemoteTimelineFetcher {
    pub fn new(resolver: ActorResolver) -> Self {
        Self { resolver }
    }

    /// Fetch the first page of an actor's outbox
    ///
    /// # Steps
    /// 1. Fetch the actor document
    /// 2. GET its outbox
    /// 3. Without inline items, follow `first` (URI or embedded page)
    ///
    /// # Errors
    /// Any failed request aborts the fetch.
    pub async fn fetch_outbox(&self, actor_uri: &str) -> Result<Vec<Post>, AppError> {
        let actor = self.resolver.fetch_actor_document(actor_uri).await?;
        let outbox_url = actor
            .outbox
            .clone()
            .ok_or_else(|| AppError::Federation(format!("Actor {actor_uri} has no outbox")))?;

        let client = self.resolver.client();
        let root = client.get_json(&outbox_url, ACTIVITY_JSON, "outbox").await?;

        let page = if items_of(&root).is_some() {
            root
        } else {
            match root.get("first").cloned() {
                Some(Value::String(first)) => {
                    client.get_json(&first, ACTIVITY_JSON, "outbox_page").await?
                }
                Some(embedded @ Value::Object(_)) if items_of(&embedded).is_some() => embedded,
                Some(Value::Object(embedded)) => match embedded.get("id").and_then(|id| id.as_str()) {
                    Some(first) => client.get_json(first, ACTIVITY_JSON, "outbox_page").await?,
                    None => root,
                },
                _ => root,
            }
        };

        let posts = extract_outbox_posts(&page, &actor);
        tracing::debug!(actor = %actor_uri, count = posts.len(), "Fetched remote outbox");
        Ok(posts)
    }
}
