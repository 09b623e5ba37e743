//! Text commands that manage subscriptions from inside a chat.
use crate::db::{self, Pool};
use crate::extract;
use crate::model::{Channel, DestinationStatus};
use crate::source::PageSource;
use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::MessageKind;
use tracing::{info, instrument, warn};

const HELP: &str = "Commands:
/add <channel url> - follow a channel here
/remove <channel id or url> - stop following a channel
/list - channels followed here
/on, /off - resume or pause notifications here";

static CHANNEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|/channel/)(UC[\w-]{22})(?:[/?#]|$)").expect("valid channel id regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Add(String),
    Remove(String),
    List,
    On,
    Off,
    Ban(Target),
    Unban(Target),
    Unknown,
}

/// Parse a message text. Returns `None` for anything that is not a command.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, arg) = match rest.split_once(char::is_whitespace) {
        Some((h, a)) => (h, a.trim()),
        None => (rest, ""),
    };
    // "/add@SomeBot" in groups
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let command = match name.as_str() {
        "start" | "help" => Command::Help,
        "add" => Command::Add(arg.to_string()),
        "remove" => Command::Remove(arg.to_string()),
        "list" => Command::List,
        "on" => Command::On,
        "off" => Command::Off,
        "ban" => parse_target(arg).map(Command::Ban).unwrap_or(Command::Unknown),
        "unban" => parse_target(arg).map(Command::Unban).unwrap_or(Command::Unknown),
        _ => Command::Unknown,
    };
    Some(command)
}

fn parse_target(arg: &str) -> Option<Target> {
    let mut parts = arg.split_whitespace();
    let chat_id = parts.next()?.parse().ok()?;
    let thread_id = match parts.next() {
        Some(t) => Some(t.parse().ok()?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Target { chat_id, thread_id })
}

/// Channel id from a bare id or an id-based channel URL.
pub fn channel_id_of(arg: &str) -> Option<&str> {
    CHANNEL_ID
        .captures(arg.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Who sent the command and where.
#[derive(Debug, Clone)]
pub struct Caller {
    pub target: Target,
    pub title: Option<String>,
    /// Private chat, bot admin or chat administrator.
    pub may_manage: bool,
    pub is_bot_admin: bool,
}

/// Only http(s) pages on youtube.com or one of its subdomains are fetched.
pub fn is_youtube_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default();
    matches!(parsed.scheme(), "http" | "https")
        && (host == "youtube.com" || host.ends_with(".youtube.com"))
}

async fn resolve_channel(
    pool: &Pool,
    source: &dyn PageSource,
    url: &str,
) -> Result<Channel> {
    if !is_youtube_url(url) {
        bail!("not a youtube.com URL: {}", url);
    }
    let html = source.fetch(url).await?;
    let info = extract::parse_channel_info(&html)?;
    db::upsert_channel(pool, &info).await
}

/// Run a command and return the reply text.
#[instrument(skip_all, fields(chat_id = caller.target.chat_id))]
pub async fn execute(
    pool: &Pool,
    source: &dyn PageSource,
    caller: &Caller,
    command: Command,
) -> Result<String> {
    let Target { chat_id, thread_id } = caller.target;
    if !matches!(command, Command::Help | Command::Unknown) && !caller.may_manage {
        return Ok("Only chat administrators can do that.".into());
    }
    let reply = match command {
        Command::Help => HELP.to_string(),
        Command::Unknown => "Unknown command. Try /help.".to_string(),
        Command::Add(url) => {
            if url.is_empty() {
                return Ok("Usage: /add <channel url>".into());
            }
            let channel = match resolve_channel(pool, source, &url).await {
                Ok(channel) => channel,
                Err(err) => {
                    warn!(?err, %url, "failed to resolve channel");
                    return Ok(format!("Could not read a channel at {}", url));
                }
            };
            let destination =
                db::upsert_destination(pool, chat_id, thread_id, caller.title.as_deref()).await?;
            if destination.status == DestinationStatus::Banned {
                return Ok("This chat is banned.".into());
            }
            if db::add_subscription(pool, channel.id, chat_id, thread_id).await? {
                info!(channel = %channel.original_id, "subscription added");
                format!("Following {}", channel.title)
            } else {
                format!("Already following {}", channel.title)
            }
        }
        Command::Remove(arg) => {
            let original_id = match channel_id_of(&arg) {
                Some(id) => id.to_string(),
                None if arg.is_empty() => return Ok("Usage: /remove <channel id or url>".into()),
                None => match resolve_channel(pool, source, &arg).await {
                    Ok(channel) => channel.original_id,
                    Err(err) => {
                        warn!(?err, %arg, "failed to resolve channel");
                        return Ok(format!("Could not read a channel at {}", arg));
                    }
                },
            };
            if db::remove_subscription(pool, &original_id, chat_id, thread_id).await? {
                format!("Stopped following {}", original_id)
            } else {
                format!("{} was not followed here", original_id)
            }
        }
        Command::List => {
            let channels = db::destination_channels(pool, chat_id, thread_id).await?;
            if channels.is_empty() {
                "No channels followed here.".to_string()
            } else {
                channels
                    .iter()
                    .map(|c| format!("{} {}", c.title, c.canonical_url()))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::On => toggle(pool, caller.target, DestinationStatus::On).await?,
        Command::Off => toggle(pool, caller.target, DestinationStatus::Off).await?,
        Command::Ban(_) | Command::Unban(_) if !caller.is_bot_admin => {
            "Only bot admins can do that.".to_string()
        }
        Command::Ban(target) => set_status(pool, target, DestinationStatus::Banned).await?,
        Command::Unban(target) => set_status(pool, target, DestinationStatus::On).await?,
    };
    Ok(reply)
}

/// Pause or resume the caller's own destination. Bans stay in place.
async fn toggle(pool: &Pool, target: Target, want: DestinationStatus) -> Result<String> {
    let reply = match db::get_destination(pool, target.chat_id, target.thread_id).await? {
        None => "Nothing is followed here yet.".to_string(),
        Some(d) if d.status == DestinationStatus::Banned => "This chat is banned.".to_string(),
        Some(_) => {
            db::set_destination_status(pool, target.chat_id, target.thread_id, want).await?;
            format!("Notifications {}", want.as_str())
        }
    };
    Ok(reply)
}

async fn set_status(pool: &Pool, target: Target, status: DestinationStatus) -> Result<String> {
    db::upsert_destination(pool, target.chat_id, target.thread_id, None).await?;
    db::set_destination_status(pool, target.chat_id, target.thread_id, status).await?;
    info!(chat_id = target.chat_id, status = status.as_str(), "destination status changed");
    Ok(format!("{} is now {}", target.chat_id, status.as_str()))
}

/// Forum topic the message was posted in. Plain reply threads do not count.
fn topic_thread_id(msg: &Message) -> Option<i32> {
    match &msg.kind {
        MessageKind::Common(common) if common.is_topic_message => msg.thread_id,
        _ => None,
    }
}

async fn may_manage(bot: &Bot, msg: &Message, is_bot_admin: bool) -> Result<bool> {
    if is_bot_admin || msg.chat.is_private() {
        return Ok(true);
    }
    let Some(user) = msg.from() else {
        return Ok(false);
    };
    let member = bot.get_chat_member(msg.chat.id, user.id).await?;
    Ok(member.is_privileged())
}

#[instrument(skip_all)]
pub async fn handle_update(
    bot: &Bot,
    pool: &Pool,
    source: &dyn PageSource,
    admin_ids: &[i64],
    msg: &Message,
) -> Result<()> {
    let Some(command) = msg.text().and_then(parse_command) else {
        return Ok(());
    };
    let is_bot_admin = msg
        .from()
        .map(|u| admin_ids.contains(&(u.id.0 as i64)))
        .unwrap_or(false);
    let thread_id = topic_thread_id(msg);
    let caller = Caller {
        target: Target {
            chat_id: msg.chat.id.0,
            thread_id,
        },
        title: msg
            .chat
            .title()
            .or_else(|| msg.chat.username())
            .map(str::to_owned),
        may_manage: may_manage(bot, msg, is_bot_admin).await?,
        is_bot_admin,
    };

    let text = execute(pool, source, &caller, command).await?;
    let mut reply = bot.send_message(msg.chat.id, text);
    if let Some(thread_id) = thread_id {
        reply = reply.message_thread_id(thread_id);
    }
    let _ = reply.await;
    Ok(())
}
