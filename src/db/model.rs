//! View models returned by repositories.
//!
//! Domain entities live in `crate::model`; these are query-shaped groupings.

use crate::model::{Channel, Destination};

/// One delivery target together with every channel it follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationChannels {
    pub destination: Destination,
    pub channels: Vec<Channel>,
}

/// Dead-letter row as read back for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: i64,
    pub chat_id: Option<i64>,
    pub thread_id: Option<i32>,
    pub item_original_id: Option<String>,
    pub payload: Vec<u8>,
    pub reason: String,
}
