use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::ChannelInfo;

pub const LIVE_STYLE: &str = "LIVE";

const VIDEO_URL_BASE: &str = "https://www.youtube.com/watch?v=";
const CHANNEL_URL_BASE: &str = "https://www.youtube.com/channel/";
const SITE_BASE: &str = "https://www.youtube.com";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DestinationStatus {
    On,
    Off,
    Banned,
}

impl DestinationStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            DestinationStatus::On => 0,
            DestinationStatus::Off => 1,
            DestinationStatus::Banned => 2,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(DestinationStatus::On),
            1 => Some(DestinationStatus::Off),
            2 => Some(DestinationStatus::Banned),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationStatus::On => "ON",
            DestinationStatus::Off => "OFF",
            DestinationStatus::Banned => "BANNED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: i64,
    pub original_id: String,
    pub canonical_base_url: Option<String>,
    pub title: String,
}

impl Channel {
    pub fn url(&self) -> String {
        format!("{}{}", CHANNEL_URL_BASE, self.original_id)
    }

    pub fn videos_url(&self) -> String {
        format!("{}/videos", self.url())
    }

    pub fn streams_url(&self) -> String {
        format!("{}/streams", self.url())
    }

    /// Human-facing URL; falls back to the id-based URL.
    pub fn canonical_url(&self) -> String {
        match &self.canonical_base_url {
            Some(base) => format!("{}{}", SITE_BASE, base),
            None => self.url(),
        }
    }
}

/// A published video or stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub original_id: String,
    pub channel_id: i64,
    pub title: String,
    pub style: Option<String>,
    pub time_ago: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scanned_at: DateTime<Utc>,
    pub live_continuous: bool,
}

impl Item {
    pub fn url(&self) -> String {
        format!("{}{}", VIDEO_URL_BASE, self.original_id)
    }

    pub fn is_live(&self) -> bool {
        self.style.as_deref() == Some(LIVE_STYLE)
    }
}

/// A chat, optionally narrowed to one forum thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Destination {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
    pub title: Option<String>,
    pub status: DestinationStatus,
}

impl Destination {
    pub fn is_deliverable(&self) -> bool {
        self.status == DestinationStatus::On
    }
}

/// Everything one scan learned about a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelScan {
    pub channel: Channel,
    pub videos: Vec<Item>,
    pub streams: Vec<Item>,
    pub header: Option<ChannelInfo>,
}

impl ChannelScan {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            videos: Vec::new(),
            streams: Vec::new(),
            header: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty() && self.streams.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.videos.iter().chain(self.streams.iter())
    }
}

pub type ScanResult = Vec<ChannelScan>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryEntry {
    pub destination: Destination,
    pub item: Item,
    pub channel_title: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryBatch {
    pub entries: Vec<DeliveryEntry>,
}

impl DeliveryBatch {
    pub fn new(entries: Vec<DeliveryEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
