//! Message and log renderings.
use teloxide::utils::html;

use crate::model::{Channel, ChannelScan, DeliveryBatch, DeliveryEntry, Destination, Item};

const MAX_TITLE_WIDTH: usize = 30;
const PLACEHOLDER: &str = " ...";

/// Collapse whitespace and cut `text` to `width` characters at a word boundary.
pub fn shorten(text: &str, width: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }
    let budget = width.saturating_sub(PLACEHOLDER.chars().count());
    let mut out = String::new();
    for word in collapsed.split(' ') {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > budget {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    let marker = if out.is_empty() {
        PLACEHOLDER.trim_start()
    } else {
        PLACEHOLDER
    };
    out.push_str(marker);
    out
}

pub fn fmt_item(item: &Item) -> String {
    format!(
        "[{}] \"{}\"",
        item.original_id,
        shorten(&item.title, MAX_TITLE_WIDTH)
    )
}

pub fn fmt_channel(channel: &Channel) -> String {
    format!(
        "[{}] \"{}\" {}",
        channel.original_id,
        shorten(&channel.title, MAX_TITLE_WIDTH),
        channel.canonical_url()
    )
}

pub fn fmt_destination(destination: &Destination) -> String {
    let name = destination.title.as_deref().unwrap_or("");
    match destination.thread_id {
        Some(thread) => format!(
            "[{}/{}] \"{}\"",
            destination.chat_id,
            thread,
            shorten(name, MAX_TITLE_WIDTH)
        ),
        None => format!("[{}] \"{}\"", destination.chat_id, shorten(name, MAX_TITLE_WIDTH)),
    }
}

pub fn fmt_pair(item: &Item, destination: &Destination) -> String {
    format!("{} ==> {}", fmt_item(item), fmt_destination(destination))
}

pub fn fmt_scan(scans: &[ChannelScan]) -> String {
    let mut lines = Vec::new();
    for scan in scans {
        lines.push(fmt_channel(&scan.channel));
        lines.extend(scan.items().map(|item| format!("    {}", fmt_item(item))));
    }
    lines.join("\n")
}

pub fn fmt_batches(batches: &[DeliveryBatch]) -> String {
    let mut lines = Vec::new();
    for (n, batch) in batches.iter().enumerate() {
        lines.push(format!("Batch #{}", n + 1));
        lines.extend(
            batch
                .entries
                .iter()
                .map(|e| format!("    {}", fmt_pair(&e.item, &e.destination))),
        );
    }
    lines.join("\n")
}

/// Notification body in Telegram HTML parse mode.
pub fn fmt_message(entry: &DeliveryEntry) -> String {
    let mut text = format!(
        "<b>{}</b>\n{}\n",
        html::escape(&entry.channel_title),
        html::escape(&entry.item.title)
    );
    if let Some(ago) = entry.item.time_ago.as_deref().filter(|s| !s.is_empty()) {
        text.push_str(&format!("<i>{}</i>\n", html::escape(ago)));
    }
    text.push_str(&entry.item.url());
    text
}
