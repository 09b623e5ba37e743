//! Turns the new items of a cycle into delivery batches.
//!
//! Every destination gets the new items of the channels it follows, oldest
//! first. Items are grouped into time slots (equal `created_at` for one
//! destination) and batch `k` carries slot `k` of every destination, so a
//! destination with a long backlog never delays the first message of another.
use std::collections::HashMap;

use crate::db::DestinationChannels;
use crate::model::{ChannelScan, DeliveryBatch, DeliveryEntry, Destination};

/// Entries owed to one destination, sorted by item creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub destination: Destination,
    pub entries: Vec<DeliveryEntry>,
}

impl Pending {
    /// Split into runs of entries sharing a `created_at`.
    fn slots(&self) -> Vec<&[DeliveryEntry]> {
        self.entries
            .chunk_by(|a, b| a.item.created_at == b.item.created_at)
            .collect()
    }
}

/// Collect per-destination entries. Destinations that are not ON, or that have
/// nothing new, are left out. Order follows `subscriptions`.
pub fn pending(scans: &[ChannelScan], subscriptions: &[DestinationChannels]) -> Vec<Pending> {
    let by_channel: HashMap<i64, &ChannelScan> =
        scans.iter().map(|s| (s.channel.id, s)).collect();

    let mut out = Vec::new();
    for sub in subscriptions {
        if !sub.destination.is_deliverable() {
            continue;
        }
        let mut entries: Vec<DeliveryEntry> = sub
            .channels
            .iter()
            .filter_map(|c| by_channel.get(&c.id))
            .flat_map(|scan| {
                scan.items().map(|item| DeliveryEntry {
                    destination: sub.destination.clone(),
                    item: item.clone(),
                    channel_title: scan.channel.title.clone(),
                })
            })
            .collect();
        if entries.is_empty() {
            continue;
        }
        entries.sort_by_key(|e| e.item.created_at);
        out.push(Pending {
            destination: sub.destination.clone(),
            entries,
        });
    }
    out
}

/// Interleave pending entries into batches, slot by slot.
pub fn interleave(pending: &[Pending]) -> Vec<DeliveryBatch> {
    let slotted: Vec<Vec<&[DeliveryEntry]>> = pending.iter().map(Pending::slots).collect();
    let depth = slotted.iter().map(Vec::len).max().unwrap_or(0);

    (0..depth)
        .map(|k| {
            let entries = slotted
                .iter()
                .filter_map(|slots| slots.get(k))
                .flat_map(|slot| slot.iter().cloned())
                .collect();
            DeliveryBatch::new(entries)
        })
        .collect()
}

pub fn build_batches(
    scans: &[ChannelScan],
    subscriptions: &[DestinationChannels],
) -> Vec<DeliveryBatch> {
    interleave(&pending(scans, subscriptions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, DestinationStatus, Item};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn channel(id: i64) -> Channel {
        Channel {
            id,
            original_id: format!("UC{}", id),
            canonical_base_url: None,
            title: format!("Channel {}", id),
        }
    }

    fn item(id: &str, channel_id: i64, created_at: DateTime<Utc>) -> Item {
        Item {
            original_id: id.into(),
            channel_id,
            title: id.to_uppercase(),
            style: None,
            time_ago: None,
            created_at,
            scanned_at: at(59),
            live_continuous: false,
        }
    }

    fn scan(channel_id: i64, videos: Vec<Item>) -> ChannelScan {
        ChannelScan {
            videos,
            ..ChannelScan::new(channel(channel_id))
        }
    }

    fn dest(chat_id: i64, status: DestinationStatus) -> Destination {
        Destination {
            chat_id,
            thread_id: None,
            title: None,
            status,
        }
    }

    fn sub(destination: Destination, channels: &[i64]) -> DestinationChannels {
        DestinationChannels {
            destination,
            channels: channels.iter().map(|&id| channel(id)).collect(),
        }
    }

    fn shape(batches: &[DeliveryBatch]) -> Vec<Vec<(i64, String)>> {
        batches
            .iter()
            .map(|b| {
                b.entries
                    .iter()
                    .map(|e| (e.destination.chat_id, e.item.original_id.clone()))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn interleaves_by_rank() {
        let scans = vec![
            scan(1, vec![item("a3", 1, at(3)), item("a1", 1, at(1)), item("a2", 1, at(2))]),
            scan(2, vec![item("b1", 2, at(5))]),
        ];
        let subs = vec![
            sub(dest(100, DestinationStatus::On), &[1]),
            sub(dest(200, DestinationStatus::On), &[2]),
        ];

        let batches = build_batches(&scans, &subs);
        assert_eq!(
            shape(&batches),
            vec![
                vec![(100, "a1".into()), (200, "b1".into())],
                vec![(100, "a2".into())],
                vec![(100, "a3".into())],
            ]
        );
        assert_eq!(batches[0].entries[0].channel_title, "Channel 1");
    }

    #[test]
    fn equal_timestamps_share_a_batch() {
        let scans = vec![scan(1, vec![item("x", 1, at(1)), item("y", 1, at(1))])];
        let subs = vec![sub(dest(100, DestinationStatus::On), &[1])];

        let batches = build_batches(&scans, &subs);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn merges_channels_of_one_destination_in_time_order() {
        let scans = vec![
            scan(1, vec![item("late", 1, at(9))]),
            ChannelScan {
                streams: vec![item("early", 2, at(1))],
                ..ChannelScan::new(channel(2))
            },
        ];
        let subs = vec![sub(dest(100, DestinationStatus::On), &[1, 2])];

        let batches = build_batches(&scans, &subs);
        assert_eq!(
            shape(&batches),
            vec![vec![(100, "early".into())], vec![(100, "late".into())]]
        );
    }

    #[test]
    fn skips_banned_and_off_destinations() {
        let scans = vec![scan(1, vec![item("a", 1, at(1))])];
        let subs = vec![
            sub(dest(100, DestinationStatus::Banned), &[1]),
            sub(dest(200, DestinationStatus::Off), &[1]),
            sub(dest(300, DestinationStatus::On), &[1]),
        ];

        let batches = build_batches(&scans, &subs);
        assert_eq!(shape(&batches), vec![vec![(300, "a".into())]]);
    }

    #[test]
    fn nothing_new_means_no_batches() {
        let subs = vec![sub(dest(100, DestinationStatus::On), &[1])];
        assert!(build_batches(&[scan(1, vec![])], &subs).is_empty());
        assert!(build_batches(&[], &subs).is_empty());
    }
}
