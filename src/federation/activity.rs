//! Activity processing
//!
//! Decodes inbound ActivityPub activities and applies their side effects
//! to the local store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::AppConfig;
use crate::data::{Database, Direction, EntityId, PostRecord, ReactionKind, User};
use crate::error::AppError;

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

/// `id` of a value that is either a bare URI or an object carrying one
fn id_of(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::to_string)
        .or_else(|| string_field(value, "id"))
}

/// ActivityPub Activity types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityType {
    Follow,
    Like,
    Announce,
    Create,
    Undo,
    Accept,
    Reject,
    Unknown(String),
}

impl ActivityType {
    /// Parse activity type from string
    pub fn parse(s: &str) -> Self {
        match s {
            "Follow" => Self::Follow,
            "Like" => Self::Like,
            "Announce" => Self::Announce,
            "Create" => Self::Create,
            "Undo" => Self::Undo,
            "Accept" => Self::Accept,
            "Reject" => Self::Reject,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Follow => "Follow",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Create => "Create",
            Self::Undo => "Undo",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Unknown(other) => other,
        }
    }
}

/// A Note object as carried by Create activities and outboxes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub attributed_to: Option<String>,
    pub content: String,
    pub published: Option<DateTime<Utc>>,
    pub in_reply_to: Option<String>,
}

impl Note {
    /// Decode a `Note`; `None` for other types or when `id` is missing
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("type").and_then(|t| t.as_str()) != Some("Note") {
            return None;
        }

        Some(Self {
            id: string_field(value, "id")?,
            attributed_to: value.get("attributedTo").and_then(id_of),
            content: string_field(value, "content").unwrap_or_default(),
            published: value
                .get("published")
                .and_then(|p| p.as_str())
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|p| p.with_timezone(&Utc)),
            in_reply_to: value
                .get("inReplyTo")
                .filter(|v| !v.is_null())
                .and_then(id_of),
        })
    }

    /// `published`, or the time the Note was first seen when absent
    pub fn created_at(&self) -> DateTime<Utc> {
        self.published.unwrap_or_else(Utc::now)
    }
}

/// The `object` of an activity
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectRef {
    /// Bare URI
    Reference(String),
    EmbeddedNote(Note),
    /// Any other embedded value, kept raw
    Unknown(Value),
}

impl ObjectRef {
    pub fn from_value(value: Value) -> Self {
        if let Some(uri) = value.as_str() {
            return Self::Reference(uri.to_string());
        }
        match Note::from_value(&value) {
            Some(note) => Self::EmbeddedNote(note),
            None => Self::Unknown(value),
        }
    }

    /// Identifier of the object, when it has one
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Reference(uri) => Some(uri),
            Self::EmbeddedNote(note) => Some(&note.id),
            Self::Unknown(raw) => raw.get("id").and_then(|id| id.as_str()),
        }
    }
}

/// A decoded inbound activity
#[derive(Debug, Clone)]
pub struct InboundActivity {
    pub id: String,
    pub activity_type: ActivityType,
    pub actor: String,
    pub object: ObjectRef,
    pub raw: Value,
}

impl InboundActivity {
    /// Decode an activity; `id`, `type` and `actor` are required
    pub fn parse(raw: Value) -> Result<Self, AppError> {
        let id = string_field(&raw, "id")
            .ok_or_else(|| AppError::Validation("Missing activity id".to_string()))?;
        let activity_type = raw
            .get("type")
            .and_then(|t| t.as_str())
            .map(ActivityType::parse)
            .ok_or_else(|| AppError::Validation("Missing activity type".to_string()))?;
        let actor = raw
            .get("actor")
            .and_then(id_of)
            .ok_or_else(|| AppError::Validation("Missing actor field".to_string()))?;
        let object = ObjectRef::from_value(raw.get("object").cloned().unwrap_or(Value::Null));

        Ok(Self {
            id,
            activity_type,
            actor,
            object,
            raw,
        })
    }
}

/// The activity an Undo refers to
///
/// Embedded activities may omit their id, so this is looser than
/// [`InboundActivity`].
#[derive(Debug)]
struct PriorActivity {
    activity_type: ActivityType,
    actor: Option<String>,
    object: Option<Value>,
}

impl PriorActivity {
    fn from_value(value: &Value) -> Option<Self> {
        let activity_type = value.get("type").and_then(|t| t.as_str())?;
        Some(Self {
            activity_type: ActivityType::parse(activity_type),
            actor: value.get("actor").and_then(id_of),
            object: value.get("object").cloned(),
        })
    }

    fn object_id(&self) -> Option<String> {
        self.object.as_ref().and_then(id_of)
    }
}

/// Split an actor URI into `(username, host[:port])`
fn author_parts(actor_uri: &str) -> Option<(String, String)> {
    let url = url::Url::parse(actor_uri).ok()?;
    let domain = super::client::authority_of(&url)?;
    let username = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?
        .trim_start_matches('@')
        .to_string();
    Some((username, domain))
}

/// Activity processor
///
/// Processes incoming ActivityPub activities from inbox.
#[derive(Clone)]
pub struct ActivityProcessor {
    db: Arc<Database>,
    config: Arc<AppConfig>,
}

impl ActivityProcessor {
    /// Create new activity processor
    pub fn new(db: Arc<Database>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Apply an activity addressed to `recipient`
    ///
    /// # Errors
    /// `UnsupportedActivityType` for types without a handler, including
    /// `Undo` of such types. Handlers may also fail with `Validation`.
    pub async fn process(
        &self,
        activity: &InboundActivity,
        recipient: &User,
    ) -> Result<(), AppError> {
        tracing::debug!(
            id = %activity.id,
            activity_type = activity.activity_type.as_str(),
            actor = %activity.actor,
            recipient = %recipient.username,
            "Dispatching activity"
        );

        match &activity.activity_type {
            ActivityType::Follow => self.handle_follow(activity, recipient).await,
            ActivityType::Like => {
                self.handle_reaction(activity, ReactionKind::Like).await
            }
            ActivityType::Announce => {
                self.handle_reaction(activity, ReactionKind::Boost).await
            }
            ActivityType::Create => self.handle_create(activity).await,
            ActivityType::Undo => self.handle_undo(activity, recipient).await,
            ActivityType::Accept => self.handle_follow_response(activity, recipient, true).await,
            ActivityType::Reject => self.handle_follow_response(activity, recipient, false).await,
            ActivityType::Unknown(other) => Err(AppError::UnsupportedActivityType(other.clone())),
        }
    }

    /// Handle Follow activity
    async fn handle_follow(
        &self,
        activity: &InboundActivity,
        recipient: &User,
    ) -> Result<(), AppError> {
        let target = activity
            .object
            .id()
            .ok_or_else(|| AppError::Validation("Missing object in Follow".to_string()))?;

        let recipient_uri = self.config.server.actor_uri(&recipient.username);
        if target.trim_end_matches('/') != recipient_uri {
            return Err(AppError::Validation(
                "Follow target is not the recipient".to_string(),
            ));
        }

        let relation = self
            .db
            .upsert_pending_follow(
                &recipient.id,
                &activity.actor,
                Direction::Inbound,
                Some(&activity.id),
            )
            .await?;

        tracing::info!(
            follower = %activity.actor,
            recipient = %recipient.username,
            relation = %relation.id,
            "Follow request recorded, awaiting local approval (Accept is not sent automatically)"
        );

        Ok(())
    }

    /// Handle Like and Announce activities
    async fn handle_reaction(
        &self,
        activity: &InboundActivity,
        kind: ReactionKind,
    ) -> Result<(), AppError> {
        let post_uri = activity.object.id().ok_or_else(|| {
            AppError::Validation(format!(
                "Missing object in {}",
                activity.activity_type.as_str()
            ))
        })?;

        match self.db.get_post_by_uri(post_uri).await? {
            Some(post) if post.is_local => {
                let inserted = self
                    .db
                    .insert_reaction(kind, post_uri, &activity.actor, Some(&activity.id))
                    .await?;
                if !inserted {
                    tracing::debug!(post = %post_uri, actor = %activity.actor, ?kind, "Reaction already recorded");
                }
            }
            _ => {
                tracing::debug!(post = %post_uri, ?kind, "Reaction to unknown post ignored");
            }
        }

        Ok(())
    }

    /// Handle Create activity
    ///
    /// Only embedded Notes are stored; references and other object types
    /// are ignored.
    async fn handle_create(&self, activity: &InboundActivity) -> Result<(), AppError> {
        let note = match &activity.object {
            ObjectRef::EmbeddedNote(note) => note,
            other => {
                tracing::debug!(id = ?other.id(), "Create without embedded Note ignored");
                return Ok(());
            }
        };

        if let Some(author) = &note.attributed_to {
            if author != &activity.actor {
                return Err(AppError::Validation(
                    "Note attributedTo does not match activity actor".to_string(),
                ));
            }
        }

        let (author_username, author_domain) = author_parts(&activity.actor)
            .ok_or_else(|| AppError::Validation(format!("Invalid actor URI: {}", activity.actor)))?;

        let record = PostRecord {
            id: EntityId::new().0,
            uri: note.id.clone(),
            local_user_id: None,
            author_uri: activity.actor.clone(),
            author_username,
            author_domain,
            content: ammonia::clean(&note.content),
            in_reply_to_uri: note.in_reply_to.clone(),
            is_local: false,
            created_at: note.created_at(),
        };

        if self.db.insert_post(&record).await? {
            tracing::info!(uri = %record.uri, author = %record.author_uri, "Stored remote post");
        } else {
            tracing::debug!(uri = %record.uri, "Remote post already stored");
        }

        Ok(())
    }

    /// Handle Undo activity
    async fn handle_undo(
        &self,
        activity: &InboundActivity,
        recipient: &User,
    ) -> Result<(), AppError> {
        let prior = match &activity.object {
            ObjectRef::Reference(uri) => {
                let stored = self.db.get_activity(uri).await?.ok_or_else(|| {
                    AppError::Validation(format!("Undo references unknown activity {uri}"))
                })?;
                let value: Value = serde_json::from_str(&stored.raw_payload)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Stored activity is not JSON: {e}")))?;
                PriorActivity::from_value(&value)
            }
            ObjectRef::Unknown(value) => PriorActivity::from_value(value),
            ObjectRef::EmbeddedNote(_) => None,
        }
        .ok_or_else(|| AppError::Validation("Undo object is not an activity".to_string()))?;

        if let Some(prior_actor) = &prior.actor {
            if prior_actor != &activity.actor {
                return Err(AppError::Validation(
                    "Undo actor does not match the undone activity".to_string(),
                ));
            }
        }

        match &prior.activity_type {
            ActivityType::Follow => {
                let removed = self
                    .db
                    .delete_follow_between(&recipient.id, &activity.actor, Direction::Inbound)
                    .await?;
                tracing::info!(follower = %activity.actor, recipient = %recipient.username, removed, "Follow undone");
                Ok(())
            }
            ActivityType::Like | ActivityType::Announce => {
                let kind = if prior.activity_type == ActivityType::Like {
                    ReactionKind::Like
                } else {
                    ReactionKind::Boost
                };
                let post_uri = prior.object_id().ok_or_else(|| {
                    AppError::Validation("Undone reaction has no object".to_string())
                })?;
                let removed = self
                    .db
                    .delete_reaction(kind, &post_uri, &activity.actor)
                    .await?;
                tracing::info!(post = %post_uri, actor = %activity.actor, ?kind, removed, "Reaction undone");
                Ok(())
            }
            other => Err(AppError::UnsupportedActivityType(format!(
                "Undo({})",
                other.as_str()
            ))),
        }
    }

    /// Handle Accept / Reject of a Follow we sent
    async fn handle_follow_response(
        &self,
        activity: &InboundActivity,
        recipient: &User,
        accepted: bool,
    ) -> Result<(), AppError> {
        let by_activity = match activity.object.id() {
            Some(follow_id) => self
                .db
                .find_follow_by_activity(follow_id)
                .await?
                .filter(|relation| {
                    relation.local_user_id == recipient.id
                        && relation.actor_uri == activity.actor
                        && relation.direction == Direction::Outbound.as_str()
                }),
            None => None,
        };

        let relation = match by_activity {
            Some(relation) => Some(relation),
            None => {
                self.db
                    .find_follow(&recipient.id, &activity.actor, Direction::Outbound)
                    .await?
            }
        };

        let Some(relation) = relation else {
            tracing::debug!(actor = %activity.actor, recipient = %recipient.username, "Follow response without matching request ignored");
            return Ok(());
        };

        if accepted {
            self.db.accept_follow(&relation.id).await?;
            tracing::info!(followee = %activity.actor, follower = %recipient.username, "Follow accepted");
        } else {
            self.db.delete_follow(&relation.id).await?;
            tracing::info!(followee = %activity.actor, follower = %recipient.username, "Follow rejected");
        }

        Ok(())
    }
}
