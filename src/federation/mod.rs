//! ActivityPub federation module
//!
//! Handles:
//! - HTTP Signatures
//! - WebFinger and actor documents
//! - Activity processing (inbox)
//! - Activity delivery
//! - Remote outbox fetching

mod activity;
mod actor;
mod client;
mod delivery;
mod outbox;
mod signature;
mod webfinger;

pub use activity::{ActivityProcessor, ActivityType, InboundActivity, Note, ObjectRef};
pub use actor::{
    ActorReference, ActorResolver, build_actor_document, parse_actor_document, parse_handle,
};
pub use client::{ACTIVITY_JSON, FederationClient, JRD_JSON, authority_of};
pub use delivery::{ActivityDelivery, builder};
pub use outbox::{RemoteTimelineFetcher, build_outbox_collection, extract_outbox_posts};
pub use signature::{
    InboundRequest, SignatureCheck, SignatureHeader, SignatureHeaders, SignatureVerifier,
    build_signed_string, decode_public_key_pem, fetch_public_key, generate_digest,
    key_id_matches_actor, parse_signature_header, sign_request, verify,
};
pub use webfinger::{
    WebFingerLink, WebFingerResponse, build_webfinger_document, find_self_link,
    parse_acct_resource,
};

#[cfg(test)]
pub(crate) use signature::tests::generate_test_keypair;
