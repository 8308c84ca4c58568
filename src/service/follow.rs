//! Follow service
//!
//! Follow relations move none → pending → accepted, and are hard deleted
//! on reject or unfollow.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::data::{Database, Direction, EntityId, FollowRelation, StoredActivity, User};
use crate::error::AppError;
use crate::federation::{ActivityDelivery, ActorResolver, builder, parse_handle};

/// Follow service
#[derive(Clone)]
pub struct FollowService {
    db: Arc<Database>,
    config: Arc<AppConfig>,
    resolver: ActorResolver,
    delivery: ActivityDelivery,
}

impl FollowService {
    pub fn new(
        db: Arc<Database>,
        config: Arc<AppConfig>,
        resolver: ActorResolver,
        delivery: ActivityDelivery,
    ) -> Self {
        Self {
            db,
            config,
            resolver,
            delivery,
        }
    }

    /// Record that `user` wants to follow `target_actor`
    ///
    /// A repeated request resets an existing relation to pending.
    pub async fn request_follow(
        &self,
        user: &User,
        target_actor: &str,
    ) -> Result<FollowRelation, AppError> {
        let actor_uri = self.config.server.actor_uri(&user.username);
        if target_actor == actor_uri {
            return Err(AppError::Validation("cannot follow yourself".to_string()));
        }

        let activity_id = format!("{}/follows/{}", actor_uri, EntityId::new().0);
        let relation = self
            .db
            .upsert_pending_follow(&user.id, target_actor, Direction::Outbound, Some(&activity_id))
            .await?;

        tracing::info!(follower = %user.username, followee = %target_actor, relation = %relation.id, "Follow requested");
        Ok(relation)
    }

    /// Pending → Accepted
    pub async fn accept(&self, relation_id: &str) -> Result<FollowRelation, AppError> {
        if !self.db.accept_follow(relation_id).await? {
            return Err(AppError::NotFound);
        }
        self.db.get_follow(relation_id).await?.ok_or(AppError::NotFound)
    }

    /// Delete a pending or accepted relation
    pub async fn reject(&self, relation_id: &str) -> Result<(), AppError> {
        if !self.db.delete_follow(relation_id).await? {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Returns false when `user` was not following `actor_uri`
    pub async fn unfollow(&self, user: &User, actor_uri: &str) -> Result<bool, AppError> {
        self.db
            .delete_follow_between(&user.id, actor_uri, Direction::Outbound)
            .await
    }

    /// True only once the relation is accepted
    pub async fn is_following(&self, user: &User, actor_uri: &str) -> Result<bool, AppError> {
        Ok(self
            .db
            .find_follow(&user.id, actor_uri, Direction::Outbound)
            .await?
            .is_some_and(|relation| relation.is_accepted()))
    }

    pub async fn follower_count(&self, actor_uri: &str) -> Result<i64, AppError> {
        let local_user = match self.config.server.local_username(actor_uri) {
            Some(username) => self.db.get_user_by_username(username).await?,
            None => None,
        };
        self.db
            .count_followers(actor_uri, local_user.as_ref().map(|user| user.id.as_str()))
            .await
    }

    pub async fn following_count(&self, user: &User) -> Result<i64, AppError> {
        self.db.count_following(&user.id).await
    }

    /// Requests waiting for `user` to answer, newest first
    pub async fn pending_requests(&self, user: &User) -> Result<Vec<FollowRelation>, AppError> {
        let actor_uri = self.config.server.actor_uri(&user.username);
        self.db.get_pending_requests(&user.id, &actor_uri).await
    }

    /// Follow an account by handle
    ///
    /// Local handles only create the relation. Remote handles are resolved,
    /// and a signed Follow is delivered once; a failed delivery is logged
    /// and leaves the relation pending.
    pub async fn follow_handle(&self, user: &User, handle: &str) -> Result<FollowRelation, AppError> {
        let (local, domain) = parse_handle(handle)?;

        if domain.eq_ignore_ascii_case(&self.config.server.domain) {
            let target = self
                .db
                .get_user_by_username(local)
                .await?
                .ok_or(AppError::NotFound)?;
            let target_uri = self.config.server.actor_uri(&target.username);
            return self.request_follow(user, &target_uri).await;
        }

        let actor = self.resolver.resolve_remote_actor(handle).await?;
        let relation = self.request_follow(user, &actor.id).await?;
        let follower_uri = self.config.server.actor_uri(&user.username);

        let follow_id = relation
            .activity_id
            .clone()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("follow relation without activity id")))?;
        let activity = builder::follow(&follow_id, &follower_uri, &actor.id);
        self.store_outbound(user, &activity, &actor.id).await?;

        if let Err(error) = self
            .delivery
            .deliver(user, &follower_uri, &actor.inbox, &activity)
            .await
        {
            tracing::warn!(followee = %actor.id, %error, "Follow stored but delivery failed");
        }

        Ok(relation)
    }

    /// Unfollow an account by handle
    ///
    /// Remote accounts are sent an `Undo(Follow)` once.
    pub async fn unfollow_handle(&self, user: &User, handle: &str) -> Result<bool, AppError> {
        let (local, domain) = parse_handle(handle)?;

        if domain.eq_ignore_ascii_case(&self.config.server.domain) {
            let target_uri = self.config.server.actor_uri(local);
            return self.unfollow(user, &target_uri).await;
        }

        let actor = self.resolver.resolve_remote_actor(handle).await?;
        let Some(relation) = self
            .db
            .find_follow(&user.id, &actor.id, Direction::Outbound)
            .await?
        else {
            return Ok(false);
        };
        self.db.delete_follow(&relation.id).await?;

        let follower_uri = self.config.server.actor_uri(&user.username);
        let follow_id = relation
            .activity_id
            .unwrap_or_else(|| format!("{}/follows/{}", follower_uri, relation.id));
        let undo = builder::undo(
            &format!("{}/undo", follow_id),
            &follower_uri,
            builder::follow(&follow_id, &follower_uri, &actor.id),
        );
        self.store_outbound(user, &undo, &follow_id).await?;

        if let Err(error) = self
            .delivery
            .deliver(user, &follower_uri, &actor.inbox, &undo)
            .await
        {
            tracing::warn!(followee = %actor.id, %error, "Undo stored but delivery failed");
        }

        Ok(true)
    }

    async fn store_outbound(
        &self,
        user: &User,
        activity: &serde_json::Value,
        object_ref: &str,
    ) -> Result<(), AppError> {
        let id = activity
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("outbound activity without id")))?;
        let activity_type = activity
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("Unknown");

        self.db
            .store_activity(&StoredActivity {
                id: id.to_string(),
                direction: Direction::Outbound.as_str().to_string(),
                local_user_id: Some(user.id.clone()),
                activity_type: activity_type.to_string(),
                actor: self.config.server.actor_uri(&user.username),
                object_ref: Some(object_ref.to_string()),
                raw_payload: activity.to_string(),
                received_at: chrono::Utc::now(),
                processed: true,
            })
            .await?;
        Ok(())
    }
}
