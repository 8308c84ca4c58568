//! Data models
//!
//! Rust structs representing database rows and the transient
//! values assembled from them. IDs are ULIDs, timestamps are chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// User
// =============================================================================

/// A local account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub summary: Option<String>,
    /// RSA private key (PKCS#8 PEM)
    #[serde(skip_serializing)]
    pub private_key_pem: String,
    /// RSA public key (SPKI PEM)
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Activity
// =============================================================================

/// Which side of the wire an activity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// Row of the append-only activity log
///
/// `raw_payload` is the exact body received or sent. Only `processed`
/// ever changes after insert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredActivity {
    pub id: String,
    pub direction: String,
    pub local_user_id: Option<String>,
    pub activity_type: String,
    pub actor: String,
    /// Object id, when the object is a reference or carries one
    pub object_ref: Option<String>,
    pub raw_payload: String,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
}

/// Result of an idempotent activity insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    AlreadyExists,
}

// =============================================================================
// Follow
// =============================================================================

/// Follow relation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowState {
    Pending,
    Accepted,
}

impl FollowState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }
}

/// A follow relation between a local user and an actor
///
/// `Outbound`: the local user follows `actor_uri`.
/// `Inbound`: `actor_uri` follows the local user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowRelation {
    pub id: String,
    pub local_user_id: String,
    pub actor_uri: String,
    pub direction: String,
    pub state: String,
    /// Follow activity that created or last refreshed the relation
    pub activity_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FollowRelation {
    pub fn is_accepted(&self) -> bool {
        self.state == FollowState::Accepted.as_str()
    }
}

// =============================================================================
// Post
// =============================================================================

/// Row of the posts table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRecord {
    pub id: String,
    /// ActivityPub URI (globally unique)
    pub uri: String,
    /// Owning local user, None for posts delivered by a remote Create
    pub local_user_id: Option<String>,
    pub author_uri: String,
    pub author_username: String,
    pub author_domain: String,
    /// HTML content
    pub content: String,
    pub in_reply_to_uri: Option<String>,
    pub is_local: bool,
    pub created_at: DateTime<Utc>,
}

/// Post row joined with derived association counts
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct PostWithCounts {
    #[sqlx(flatten)]
    pub record: PostRecord,
    pub like_count: i64,
    pub boost_count: i64,
    pub reply_count: i64,
}

/// Who wrote a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub actor_uri: String,
    pub username: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Position of a post inside its reply chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadContext {
    pub root_id: String,
    pub reply_depth: u32,
}

/// A post as shown in a timeline
///
/// Local and inbox-delivered posts come from the database; posts read
/// from a remote outbox exist only for the duration of one fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// ActivityPub URI
    pub id: String,
    pub author: AuthorRef,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    pub is_local: bool,
    pub like_count: i64,
    pub boost_count: i64,
    pub reply_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadContext>,
}

impl From<PostWithCounts> for Post {
    fn from(row: PostWithCounts) -> Self {
        let PostWithCounts {
            record,
            like_count,
            boost_count,
            reply_count,
        } = row;
        Self {
            id: record.uri,
            author: AuthorRef {
                actor_uri: record.author_uri,
                username: record.author_username,
                domain: record.author_domain,
                display_name: None,
            },
            content: record.content,
            created_at: record.created_at,
            reply_to_id: record.in_reply_to_uri,
            is_local: record.is_local,
            like_count,
            boost_count,
            reply_count,
            thread: None,
        }
    }
}

// =============================================================================
// Likes / Boosts
// =============================================================================

/// Which association table a reaction lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Like,
    Boost,
}

impl ReactionKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            Self::Like => "likes",
            Self::Boost => "boosts",
        }
    }
}
