//! Account service
//!
//! Local accounts and the posts they author.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::data::{Database, EntityId, Post, PostRecord, ReactionKind, User};
use crate::error::AppError;

fn normalize_optional_text(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Generate an RSA keypair as `(PKCS#8 private PEM, SPKI public PEM)`
async fn generate_keypair(bits: usize) -> Result<(String, String), AppError> {
    tokio::task::spawn_blocking(move || -> Result<(String, String), anyhow::Error> {
        use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)?;
        let public_key = RsaPublicKey::from(&private_key);
        let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();
        let public_key_pem = public_key.to_public_key_pem(LineEnding::LF)?;
        Ok((private_key_pem, public_key_pem))
    })
    .await
    .map_err(|e| AppError::Internal(e.into()))?
    .map_err(AppError::Internal)
}

/// Account service
#[derive(Clone)]
pub struct AccountService {
    db: Arc<Database>,
    config: Arc<AppConfig>,
}

impl AccountService {
    /// Create new account service
    pub fn new(db: Arc<Database>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User, AppError> {
        self.db
            .get_user_by_username(username)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Create a local account with a fresh RSA keypair
    ///
    /// # Errors
    /// `Validation` if the username is empty or already taken
    pub async fn create_account(
        &self,
        username: &str,
        display_name: Option<String>,
        summary: Option<String>,
    ) -> Result<User, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("username cannot be empty".to_string()));
        }

        // Fast-path guard before expensive key generation.
        if self.db.get_user_by_username(username).await?.is_some() {
            return Err(AppError::Validation(format!(
                "username {username} is already taken"
            )));
        }

        let (private_key_pem, public_key_pem) =
            generate_keypair(self.config.admin.key_bits).await?;

        let user = User {
            id: EntityId::new().0,
            username: username.to_string(),
            display_name: normalize_optional_text(display_name),
            summary: normalize_optional_text(summary),
            private_key_pem,
            public_key_pem,
            created_at: chrono::Utc::now(),
        };

        self.db.insert_user(&user).await?;
        tracing::info!(username = %user.username, "Created local account");

        Ok(user)
    }

    /// Return the configured admin account, creating it on first start
    pub async fn ensure_admin_user(&self) -> Result<User, AppError> {
        let admin = &self.config.admin;
        if let Some(user) = self.db.get_user_by_username(&admin.username).await? {
            return Ok(user);
        }

        tracing::info!(username = %admin.username, "Admin account not found, creating");
        self.create_account(
            &admin.username,
            Some(admin.display_name.clone()),
            admin.summary.clone(),
        )
        .await
    }

    /// Publish a local post
    ///
    /// The content is sanitized; `in_reply_to` may name any post URI.
    pub async fn publish_post(
        &self,
        author: &User,
        content: &str,
        in_reply_to: Option<&str>,
    ) -> Result<Post, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::Validation("post content cannot be empty".to_string()));
        }

        let actor_uri = self.config.server.actor_uri(&author.username);
        let id = EntityId::new().0;
        let record = PostRecord {
            uri: format!("{}/posts/{}", actor_uri, id),
            id,
            local_user_id: Some(author.id.clone()),
            author_uri: actor_uri,
            author_username: author.username.clone(),
            author_domain: self.config.server.domain.clone(),
            content: ammonia::clean(content),
            in_reply_to_uri: in_reply_to.map(str::to_string),
            is_local: true,
            created_at: chrono::Utc::now(),
        };

        self.db.insert_post(&record).await?;
        self.db
            .get_post_by_uri(&record.uri)
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn like_post(&self, user: &User, post_uri: &str) -> Result<Post, AppError> {
        self.react(user, post_uri, ReactionKind::Like, true).await
    }

    pub async fn unlike_post(&self, user: &User, post_uri: &str) -> Result<Post, AppError> {
        self.react(user, post_uri, ReactionKind::Like, false).await
    }

    pub async fn boost_post(&self, user: &User, post_uri: &str) -> Result<Post, AppError> {
        self.react(user, post_uri, ReactionKind::Boost, true).await
    }

    pub async fn unboost_post(&self, user: &User, post_uri: &str) -> Result<Post, AppError> {
        self.react(user, post_uri, ReactionKind::Boost, false).await
    }

    /// Add or remove `user`'s reaction and return the post with fresh counts
    ///
    /// Repeating a like or removing a missing one is a no-op.
    async fn react(
        &self,
        user: &User,
        post_uri: &str,
        kind: ReactionKind,
        add: bool,
    ) -> Result<Post, AppError> {
        if self.db.get_post_by_uri(post_uri).await?.is_none() {
            return Err(AppError::NotFound);
        }

        let actor_uri = self.config.server.actor_uri(&user.username);
        let changed = if add {
            self.db
                .insert_reaction(kind, post_uri, &actor_uri, None)
                .await?
        } else {
            self.db.delete_reaction(kind, post_uri, &actor_uri).await?
        };
        if changed {
            tracing::debug!(username = %user.username, post_uri, ?kind, add, "Reaction updated");
        }

        self.db
            .get_post_by_uri(post_uri)
            .await?
            .ok_or(AppError::NotFound)
    }
}
