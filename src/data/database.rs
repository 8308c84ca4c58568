//! SQLite database operations
//!
//! All database access goes through this module.

use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Post columns plus counts derived from the association tables.
const POST_WITH_COUNTS: &str = r#"
    SELECT p.*,
        (SELECT COUNT(*) FROM likes l WHERE l.post_uri = p.uri) AS like_count,
        (SELECT COUNT(*) FROM boosts b WHERE b.post_uri = p.uri) AS boost_count,
        (SELECT COUNT(*) FROM posts r WHERE r.in_reply_to_uri = p.uri) AS reply_count
    FROM posts p
"#;

/// Database connection pool wrapper.
///
/// Passed explicitly (behind an `Arc`) to every service that persists state.
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, username, display_name, summary, private_key_pem, public_key_pem, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.display_name)
        .bind(&user.summary)
        .bind(&user.private_key_pem)
        .bind(&user.public_key_pem)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    // =========================================================================
    // Activities
    // =========================================================================

    /// Append an activity to the log
    ///
    /// The primary key on `id` makes the existence check and the insert a
    /// single statement, so concurrent redeliveries cannot both succeed.
    pub async fn store_activity(&self, activity: &StoredActivity) -> Result<StoreOutcome, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO activities (
                id, direction, local_user_id, activity_type, actor, object_ref,
                raw_payload, received_at, processed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&activity.id)
        .bind(&activity.direction)
        .bind(&activity.local_user_id)
        .bind(&activity.activity_type)
        .bind(&activity.actor)
        .bind(&activity.object_ref)
        .bind(&activity.raw_payload)
        .bind(activity.received_at)
        .bind(activity.processed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(StoreOutcome::AlreadyExists)
        } else {
            Ok(StoreOutcome::Stored)
        }
    }

    pub async fn get_activity(&self, id: &str) -> Result<Option<StoredActivity>, AppError> {
        let activity =
            sqlx::query_as::<_, StoredActivity>("SELECT * FROM activities WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(activity)
    }

    pub async fn mark_activity_processed(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE activities SET processed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Follows
    // =========================================================================

    /// Create or refresh a follow relation in the pending state
    ///
    /// An existing row for the same (user, actor, direction) keeps its id
    /// but goes back to pending with the new activity id.
    pub async fn upsert_pending_follow(
        &self,
        local_user_id: &str,
        actor_uri: &str,
        direction: Direction,
        activity_id: Option<&str>,
    ) -> Result<FollowRelation, AppError> {
        let relation = sqlx::query_as::<_, FollowRelation>(
            r#"
            INSERT INTO follows (id, local_user_id, actor_uri, direction, state, activity_id, created_at)
            VALUES (?, ?, ?, ?, 'pending', ?, ?)
            ON CONFLICT(local_user_id, actor_uri, direction) DO UPDATE SET
                state = 'pending',
                activity_id = excluded.activity_id
            RETURNING *
            "#,
        )
        .bind(EntityId::new().0)
        .bind(local_user_id)
        .bind(actor_uri)
        .bind(direction.as_str())
        .bind(activity_id)
        .bind(chrono::Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(relation)
    }

    pub async fn get_follow(&self, id: &str) -> Result<Option<FollowRelation>, AppError> {
        let relation = sqlx::query_as::<_, FollowRelation>("SELECT * FROM follows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(relation)
    }

    pub async fn find_follow(
        &self,
        local_user_id: &str,
        actor_uri: &str,
        direction: Direction,
    ) -> Result<Option<FollowRelation>, AppError> {
        let relation = sqlx::query_as::<_, FollowRelation>(
            "SELECT * FROM follows WHERE local_user_id = ? AND actor_uri = ? AND direction = ?",
        )
        .bind(local_user_id)
        .bind(actor_uri)
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(relation)
    }

    pub async fn find_follow_by_activity(
        &self,
        activity_id: &str,
    ) -> Result<Option<FollowRelation>, AppError> {
        let relation =
            sqlx::query_as::<_, FollowRelation>("SELECT * FROM follows WHERE activity_id = ?")
                .bind(activity_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(relation)
    }

    /// Move a relation to accepted. Returns false when no row matched.
    pub async fn accept_follow(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE follows SET state = 'accepted' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Hard delete. Returns false when no row matched.
    pub async fn delete_follow(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM follows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_follow_between(
        &self,
        local_user_id: &str,
        actor_uri: &str,
        direction: Direction,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM follows WHERE local_user_id = ? AND actor_uri = ? AND direction = ?",
        )
        .bind(local_user_id)
        .bind(actor_uri)
        .bind(direction.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count accepted followers of an actor
    ///
    /// Local users following `actor_uri` are outbound rows; when the actor is
    /// itself local (`local_user_id` set) its inbound rows count too.
    pub async fn count_followers(
        &self,
        actor_uri: &str,
        local_user_id: Option<&str>,
    ) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM follows
            WHERE state = 'accepted'
              AND ((direction = 'outbound' AND actor_uri = ?)
                OR (direction = 'inbound' AND local_user_id = ?))
            "#,
        )
        .bind(actor_uri)
        .bind(local_user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn count_following(&self, local_user_id: &str) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM follows WHERE local_user_id = ? AND direction = 'outbound' AND state = 'accepted'",
        )
        .bind(local_user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn get_followed_actors(&self, local_user_id: &str) -> Result<Vec<String>, AppError> {
        let actors: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT actor_uri FROM follows
            WHERE local_user_id = ? AND direction = 'outbound' AND state = 'accepted'
            ORDER BY created_at
            "#,
        )
        .bind(local_user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(actors)
    }

    /// Pending requests addressed to a local user
    ///
    /// Remote requests are inbound rows of that user; requests from other
    /// local users are their outbound rows targeting `actor_uri`.
    pub async fn get_pending_requests(
        &self,
        local_user_id: &str,
        actor_uri: &str,
    ) -> Result<Vec<FollowRelation>, AppError> {
        let relations = sqlx::query_as::<_, FollowRelation>(
            r#"
            SELECT * FROM follows
            WHERE state = 'pending'
              AND ((direction = 'inbound' AND local_user_id = ?)
                OR (direction = 'outbound' AND actor_uri = ?))
            ORDER BY created_at DESC
            "#,
        )
        .bind(local_user_id)
        .bind(actor_uri)
        .fetch_all(&self.pool)
        .await?;

        Ok(relations)
    }

    // =========================================================================
    // Posts
    // =========================================================================

    /// Insert a post; a post with the same URI is left untouched.
    pub async fn insert_post(&self, post: &PostRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (
                id, uri, local_user_id, author_uri, author_username, author_domain,
                content, in_reply_to_uri, is_local, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO NOTHING
            "#,
        )
        .bind(&post.id)
        .bind(&post.uri)
        .bind(&post.local_user_id)
        .bind(&post.author_uri)
        .bind(&post.author_username)
        .bind(&post.author_domain)
        .bind(&post.content)
        .bind(&post.in_reply_to_uri)
        .bind(post.is_local)
        .bind(post.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_post_by_uri(&self, uri: &str) -> Result<Option<Post>, AppError> {
        let row = sqlx::query_as::<_, PostWithCounts>(&format!("{POST_WITH_COUNTS} WHERE p.uri = ?"))
            .bind(uri)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Post::from))
    }

    pub async fn get_posts_by_uris(&self, uris: &[String]) -> Result<Vec<Post>, AppError> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(POST_WITH_COUNTS);
        builder.push(" WHERE p.uri IN (");
        let mut separated = builder.separated(", ");
        for uri in uris {
            separated.push_bind(uri);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<PostWithCounts>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Most recent local posts, newest first
    pub async fn get_local_posts(&self, limit: i64) -> Result<Vec<Post>, AppError> {
        let rows = sqlx::query_as::<_, PostWithCounts>(&format!(
            "{POST_WITH_COUNTS} WHERE p.is_local = 1 ORDER BY p.created_at DESC, p.id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Most recent stored posts written by any of `author_uris`, newest first
    pub async fn get_posts_by_authors(
        &self,
        author_uris: &[String],
        limit: i64,
    ) -> Result<Vec<Post>, AppError> {
        if author_uris.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(POST_WITH_COUNTS);
        builder.push(" WHERE p.author_uri IN (");
        let mut separated = builder.separated(", ");
        for author in author_uris {
            separated.push_bind(author);
        }
        separated.push_unseparated(")");
        builder.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<PostWithCounts>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Direct replies to any of `parent_uris`
    pub async fn get_replies_to(&self, parent_uris: &[String]) -> Result<Vec<Post>, AppError> {
        if parent_uris.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(POST_WITH_COUNTS);
        builder.push(" WHERE p.in_reply_to_uri IN (");
        let mut separated = builder.separated(", ");
        for uri in parent_uris {
            separated.push_bind(uri);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<PostWithCounts>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Outbox page of a local user, newest first
    pub async fn get_user_posts(&self, local_user_id: &str, limit: i64) -> Result<Vec<Post>, AppError> {
        let rows = sqlx::query_as::<_, PostWithCounts>(&format!(
            "{POST_WITH_COUNTS} WHERE p.local_user_id = ? AND p.is_local = 1 ORDER BY p.created_at DESC, p.id DESC LIMIT ?"
        ))
        .bind(local_user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Post::from).collect())
    }

    // =========================================================================
    // Likes / Boosts
    // =========================================================================

    /// Record a like or boost. Returns false when the actor already reacted.
    pub async fn insert_reaction(
        &self,
        kind: ReactionKind,
        post_uri: &str,
        actor_uri: &str,
        activity_id: Option<&str>,
    ) -> Result<bool, AppError> {
        let sql = format!(
            "INSERT INTO {} (id, post_uri, actor_uri, activity_id, created_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(post_uri, actor_uri) DO NOTHING",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(EntityId::new().0)
            .bind(post_uri)
            .bind(actor_uri)
            .bind(activity_id)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_reaction(
        &self,
        kind: ReactionKind,
        post_uri: &str,
        actor_uri: &str,
    ) -> Result<bool, AppError> {
        let sql = format!(
            "DELETE FROM {} WHERE post_uri = ? AND actor_uri = ?",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(post_uri)
            .bind(actor_uri)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
