//! Inbox pipeline
//!
//! Parses a verified delivery, appends it to the activity log and
//! dispatches it exactly once.

use std::sync::Arc;

use crate::data::{Database, Direction, StoreOutcome, StoredActivity, User};
use crate::error::AppError;
use crate::federation::{ActivityProcessor, InboundActivity, SignatureCheck, key_id_matches_actor};
use crate::metrics::ACTIVITIES_RECEIVED;

/// How an inbound activity was handled
#[derive(Debug)]
pub enum InboxOutcome {
    /// Stored and dispatched
    Processed,
    /// Already stored; nothing was done
    Duplicate,
    /// Stored but the dispatcher failed; the activity stays unprocessed
    Unprocessed(AppError),
}

/// Inbox service
#[derive(Clone)]
pub struct InboxService {
    db: Arc<Database>,
    processor: ActivityProcessor,
}

impl InboxService {
    pub fn new(db: Arc<Database>, processor: ActivityProcessor) -> Self {
        Self { db, processor }
    }

    /// Process an inbound activity for `recipient`
    ///
    /// # Steps
    /// 1. Parse the body
    /// 2. Check the signing key belongs to the activity actor
    /// 3. Store the raw payload (dedup by activity id)
    /// 4. Dispatch and mark processed
    ///
    /// # Errors
    /// `Validation` for unparseable bodies and `Unauthorized` when the key
    /// owner is not the actor. Dispatch failures are reported through
    /// [`InboxOutcome::Unprocessed`], not as errors.
    pub async fn process_inbound_activity(
        &self,
        raw: &[u8],
        recipient: &User,
        check: &SignatureCheck,
    ) -> Result<InboxOutcome, AppError> {
        let payload = std::str::from_utf8(raw)
            .map_err(|_| AppError::Validation("Activity body is not UTF-8".to_string()))?;
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
        let activity = InboundActivity::parse(value)?;
        let activity_type = activity.activity_type.as_str().to_string();

        if let SignatureCheck::Verified { key_id } = check {
            if !key_id_matches_actor(key_id, &activity.actor) {
                ACTIVITIES_RECEIVED
                    .with_label_values(&[activity_type.as_str(), "unauthorized"])
                    .inc();
                return Err(AppError::Unauthorized);
            }
        }

        let stored = StoredActivity {
            id: activity.id.clone(),
            direction: Direction::Inbound.as_str().to_string(),
            local_user_id: Some(recipient.id.clone()),
            activity_type: activity_type.clone(),
            actor: activity.actor.clone(),
            object_ref: activity.object.id().map(str::to_string),
            raw_payload: payload.to_string(),
            received_at: chrono::Utc::now(),
            processed: false,
        };

        if self.db.store_activity(&stored).await? == StoreOutcome::AlreadyExists {
            tracing::debug!(id = %activity.id, "Duplicate activity skipped");
            ACTIVITIES_RECEIVED
                .with_label_values(&[activity_type.as_str(), "duplicate"])
                .inc();
            return Ok(InboxOutcome::Duplicate);
        }

        match self.processor.process(&activity, recipient).await {
            Ok(()) => {
                self.db.mark_activity_processed(&activity.id).await?;
                ACTIVITIES_RECEIVED
                    .with_label_values(&[activity_type.as_str(), "processed"])
                    .inc();
                Ok(InboxOutcome::Processed)
            }
            Err(error) => {
                tracing::warn!(
                    id = %activity.id,
                    %activity_type,
                    %error,
                    "Activity stored but not processed"
                );
                ACTIVITIES_RECEIVED
                    .with_label_values(&[activity_type.as_str(), "unprocessed"])
                    .inc();
                Ok(InboxOutcome::Unprocessed(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::data::EntityId;
    use serde_json::json;
    use tempfile::TempDir;

    const BOB: &str = "https://remote.example/users/bob";

    async fn create_test_service() -> (InboxService, Arc<Database>, User, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("inbox_test.db");
        let db = Arc::new(Database::connect(&db_path).await.unwrap());
        let config = Arc::new(crate::config::tests::valid_config());

        let user = User {
            id: EntityId::new().0,
            username: "alice".to_string(),
            display_name: None,
            summary: None,
            private_key_pem: String::new(),
            public_key_pem: String::new(),
            created_at: Utc::now(),
        };
        db.insert_user(&user).await.unwrap();

        let processor = ActivityProcessor::new(db.clone(), config);
        (InboxService::new(db.clone(), processor), db, user, temp_dir)
    }

    fn verified_as_bob() -> SignatureCheck {
        SignatureCheck::Verified {
            key_id: format!("{BOB}#main-key"),
        }
    }

    #[tokio::test]
    async fn follow_is_stored_processed_and_deduplicated() {
        let (service, db, alice, _temp_dir) = create_test_service().await;
        let body = json!({
            "id": "https://remote.example/follows/1",
            "type": "Follow",
            "actor": BOB,
            "object": "http://localhost/users/alice"
        })
        .to_string();

        let first = service
            .process_inbound_activity(body.as_bytes(), &alice, &verified_as_bob())
            .await
            .unwrap();
        assert!(matches!(first, InboxOutcome::Processed));

        let second = service
            .process_inbound_activity(body.as_bytes(), &alice, &verified_as_bob())
            .await
            .unwrap();
        assert!(matches!(second, InboxOutcome::Duplicate));

        let stored = db
            .get_activity("https://remote.example/follows/1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.processed);
        assert_eq!(stored.raw_payload, body);
        assert_eq!(
            db.get_pending_requests(&alice.id, "http://localhost/users/alice")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn unsupported_type_is_stored_unprocessed() {
        let (service, db, alice, _temp_dir) = create_test_service().await;
        let body = json!({
            "id": "https://remote.example/arrive/1",
            "type": "Arrive",
            "actor": BOB,
            "location": "https://remote.example/places/home"
        })
        .to_string();

        let outcome = service
            .process_inbound_activity(body.as_bytes(), &alice, &SignatureCheck::Skipped)
            .await
            .unwrap();
        match outcome {
            InboxOutcome::Unprocessed(AppError::UnsupportedActivityType(t)) => {
                assert_eq!(t, "Arrive")
            }
            other => panic!("expected unsupported outcome, got: {other:?}"),
        }

        let stored = db
            .get_activity("https://remote.example/arrive/1")
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.processed);
        assert_eq!(stored.activity_type, "Arrive");
    }

    #[tokio::test]
    async fn key_owner_must_match_actor() {
        let (service, db, alice, _temp_dir) = create_test_service().await;
        let body = json!({
            "id": "https://evil.example/follows/1",
            "type": "Follow",
            "actor": "https://evil.example/users/mallory",
            "object": "http://localhost/users/alice"
        })
        .to_string();

        let result = service
            .process_inbound_activity(body.as_bytes(), &alice, &verified_as_bob())
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized)));
        assert!(
            db.get_activity("https://evil.example/follows/1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (service, _db, alice, _temp_dir) = create_test_service().await;

        for body in [&b"not json"[..], &br#"{"type":"Follow"}"#[..]] {
            assert!(matches!(
                service
                    .process_inbound_activity(body, &alice, &SignatureCheck::Skipped)
                    .await,
                Err(AppError::Validation(_))
            ));
        }
    }
}
