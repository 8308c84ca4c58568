//! Timeline service
//!
//! Builds timelines from the database and from the outboxes of followed
//! remote actors.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use super::merge::{MAX_THREAD_HOPS, merge_timeline, thread_order};
use crate::config::AppConfig;
use crate::data::{Database, Post, User};
use crate::error::AppError;
use crate::federation::RemoteTimelineFetcher;
use crate::metrics::{REMOTE_FETCHES, TIMELINE_BUILD_DURATION_SECONDS};

/// A following timeline and the remote actors that could not be read
#[derive(Debug)]
pub struct FollowingTimeline {
    pub posts: Vec<Post>,
    pub failed_actors: Vec<String>,
}

/// Timeline service
#[derive(Clone)]
pub struct TimelineService {
    db: Arc<Database>,
    config: Arc<AppConfig>,
    fetcher: RemoteTimelineFetcher,
}

impl TimelineService {
    /// Create new timeline service
    pub fn new(db: Arc<Database>, config: Arc<AppConfig>, fetcher: RemoteTimelineFetcher) -> Self {
        Self {
            db,
            config,
            fetcher,
        }
    }

    /// Most recent local posts, thread-ordered
    pub async fn local_timeline(&self) -> Result<Vec<Post>, AppError> {
        let _timer = TIMELINE_BUILD_DURATION_SECONDS
            .with_label_values(&["local"])
            .start_timer();

        let posts = self.db.get_local_posts(self.config.timeline.local_limit).await?;
        Ok(thread_order(posts))
    }

    /// Timeline of everything `user` follows, plus their own posts
    ///
    /// # Steps
    /// 1. Stored posts of the user and accepted followees
    /// 2. Replies to those posts and their ancestors, for thread context
    /// 3. First outbox page of every followed remote actor, concurrently
    /// 4. Merge
    ///
    /// A remote actor whose outbox cannot be read is logged and left out.
    pub async fn following_timeline(&self, user: &User) -> Result<FollowingTimeline, AppError> {
        let _timer = TIMELINE_BUILD_DURATION_SECONDS
            .with_label_values(&["following"])
            .start_timer();

        let followed = self.db.get_followed_actors(&user.id).await?;
        let mut authors = followed.clone();
        authors.push(self.config.server.actor_uri(&user.username));

        let stored = self.stored_posts_with_threads(&authors).await?;

        let remote_actors: Vec<String> = followed
            .into_iter()
            .filter(|actor| self.config.server.local_username(actor).is_none())
            .collect();
        let (remote, failed_actors) = self.fetch_remote_posts(remote_actors).await;

        let posts = merge_timeline(stored.into_iter().chain(remote));
        tracing::debug!(
            user = %user.username,
            count = posts.len(),
            failed = failed_actors.len(),
            "Built following timeline"
        );

        Ok(FollowingTimeline {
            posts,
            failed_actors,
        })
    }

    async fn stored_posts_with_threads(&self, authors: &[String]) -> Result<Vec<Post>, AppError> {
        let mut posts = self
            .db
            .get_posts_by_authors(authors, self.config.timeline.following_local_limit)
            .await?;
        let mut seen: HashSet<String> = posts.iter().map(|p| p.id.clone()).collect();

        // Replies below the selected posts.
        let mut frontier: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        for _ in 0..MAX_THREAD_HOPS {
            if frontier.is_empty() {
                break;
            }
            let replies = self.db.get_replies_to(&frontier).await?;
            frontier = replies
                .iter()
                .filter(|p| !seen.contains(&p.id))
                .map(|p| p.id.clone())
                .collect();
            for reply in replies {
                if seen.insert(reply.id.clone()) {
                    posts.push(reply);
                }
            }
        }

        // Stored ancestors of the selected posts.
        for _ in 0..MAX_THREAD_HOPS {
            let missing: Vec<String> = posts
                .iter()
                .filter_map(|p| p.reply_to_id.clone())
                .filter(|parent| !seen.contains(parent))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if missing.is_empty() {
                break;
            }
            let ancestors = self.db.get_posts_by_uris(&missing).await?;
            // Unknown parents stay missing; remember them so the walk ends.
            seen.extend(missing);
            posts.extend(ancestors);
        }

        Ok(posts)
    }

    async fn fetch_remote_posts(&self, actors: Vec<String>) -> (Vec<Post>, Vec<String>) {
        let max_concurrent = self.config.federation.max_concurrent_fetches;
        // Actor document, outbox and first page.
        let deadline = self.config.federation.fetch_timeout() * 3;

        let results = stream::iter(actors)
            .map(|actor| {
                let fetcher = self.fetcher.clone();
                async move {
                    let result = tokio::time::timeout(deadline, fetcher.fetch_outbox(&actor)).await;
                    (actor, result)
                }
            })
            .buffer_unordered(max_concurrent)
            .collect::<Vec<_>>()
            .await;

        let mut posts = Vec::new();
        let mut failed = Vec::new();
        for (actor, result) in results {
            match result {
                Ok(Ok(fetched)) => posts.extend(fetched),
                Ok(Err(error)) => {
                    tracing::warn!(%actor, %error, "Failed to fetch remote outbox");
                    failed.push(actor);
                }
                Err(_) => {
                    tracing::warn!(%actor, "Remote outbox fetch timed out");
                    REMOTE_FETCHES.with_label_values(&["outbox", "timeout"]).inc();
                    failed.push(actor);
                }
            }
        }

        (posts, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Direction, EntityId, PostRecord};
    use crate::federation::{ActorResolver, FederationClient};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    async fn create_test_service() -> (TimelineService, Arc<Database>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("timeline_test.db");
        let db = Arc::new(Database::connect(&db_path).await.unwrap());
        let config = Arc::new(crate::config::tests::valid_config());
        let client = FederationClient::new(Arc::new(reqwest::Client::new()), &config.federation);
        let fetcher = RemoteTimelineFetcher::new(ActorResolver::new(
            client,
            config.federation.discovery_scheme(),
        ));

        (TimelineService::new(db.clone(), config, fetcher), db, temp_dir)
    }

    async fn insert_user(db: &Database, username: &str) -> User {
        let user = User {
            id: EntityId::new().0,
            username: username.to_string(),
            display_name: None,
            summary: None,
            private_key_pem: String::new(),
            public_key_pem: String::new(),
            created_at: Utc::now(),
        };
        db.insert_user(&user).await.unwrap();
        user
    }

    async fn insert_post(
        db: &Database,
        author_uri: &str,
        local_user_id: Option<&str>,
        uri: &str,
        reply_to: Option<&str>,
        minutes_ago: i64,
    ) {
        let username = author_uri.rsplit('/').next().unwrap().to_string();
        db.insert_post(&PostRecord {
            id: EntityId::new().0,
            uri: uri.to_string(),
            local_user_id: local_user_id.map(str::to_string),
            author_uri: author_uri.to_string(),
            author_username: username,
            author_domain: "localhost".to_string(),
            content: uri.to_string(),
            in_reply_to_uri: reply_to.map(str::to_string),
            is_local: local_user_id.is_some(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn following_timeline_includes_followees_self_and_thread_replies() {
        let (service, db, _temp_dir) = create_test_service().await;
        let alice = insert_user(&db, "alice").await;
        let carol = insert_user(&db, "carol").await;
        let dave = insert_user(&db, "dave").await;
        let alice_uri = "http://localhost/users/alice";
        let carol_uri = "http://localhost/users/carol";
        let dave_uri = "http://localhost/users/dave";

        let relation = db
            .upsert_pending_follow(&alice.id, carol_uri, Direction::Outbound, None)
            .await
            .unwrap();
        db.accept_follow(&relation.id).await.unwrap();

        insert_post(&db, carol_uri, Some(&carol.id), "c1", None, 30).await;
        insert_post(&db, alice_uri, Some(&alice.id), "a1", None, 20).await;
        insert_post(&db, dave_uri, Some(&dave.id), "d1", None, 10).await;
        insert_post(&db, dave_uri, Some(&dave.id), "d-reply", Some("c1"), 5).await;

        let timeline = service.following_timeline(&alice).await.unwrap();
        let ids: Vec<&str> = timeline.posts.iter().map(|p| p.id.as_str()).collect();

        assert!(timeline.failed_actors.is_empty());
        assert_eq!(ids, vec!["c1", "d-reply", "a1"]);
        assert_eq!(
            timeline.posts[1].thread.as_ref().unwrap().root_id,
            "c1"
        );
    }

    #[tokio::test]
    async fn pending_follows_do_not_contribute() {
        let (service, db, _temp_dir) = create_test_service().await;
        let alice = insert_user(&db, "alice").await;
        let carol = insert_user(&db, "carol").await;
        let carol_uri = "http://localhost/users/carol";

        db.upsert_pending_follow(&alice.id, carol_uri, Direction::Outbound, None)
            .await
            .unwrap();
        insert_post(&db, carol_uri, Some(&carol.id), "c1", None, 30).await;

        let timeline = service.following_timeline(&alice).await.unwrap();
        assert!(timeline.posts.is_empty());
    }

    #[tokio::test]
    async fn unreachable_remote_actor_is_reported_not_fatal() {
        let (service, db, _temp_dir) = create_test_service().await;
        let alice = insert_user(&db, "alice").await;
        let unreachable = "http://127.0.0.1:1/users/bob";

        let relation = db
            .upsert_pending_follow(&alice.id, unreachable, Direction::Outbound, None)
            .await
            .unwrap();
        db.accept_follow(&relation.id).await.unwrap();
        insert_post(
            &db,
            "http://localhost/users/alice",
            Some(&alice.id),
            "a1",
            None,
            1,
        )
        .await;

        let timeline = service.following_timeline(&alice).await.unwrap();
        assert_eq!(timeline.failed_actors, vec![unreachable.to_string()]);
        assert_eq!(timeline.posts.len(), 1);
    }

    #[tokio::test]
    async fn local_timeline_orders_threads() {
        let (service, db, _temp_dir) = create_test_service().await;
        let alice = insert_user(&db, "alice").await;
        let alice_uri = "http://localhost/users/alice";

        insert_post(&db, alice_uri, Some(&alice.id), "root", None, 30).await;
        insert_post(&db, alice_uri, Some(&alice.id), "newer", None, 10).await;
        insert_post(&db, alice_uri, Some(&alice.id), "reply", Some("root"), 5).await;

        let timeline = service.local_timeline().await.unwrap();
        let ids: Vec<&str> = timeline.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "root", "reply"]);
    }
}
