//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database and federation operations.

mod account;
mod follow;
mod inbox;
pub mod merge;
mod timeline;

pub use account::AccountService;
pub use follow::FollowService;
pub use inbox::{InboxOutcome, InboxService};
pub use timeline::{FollowingTimeline, TimelineService};
