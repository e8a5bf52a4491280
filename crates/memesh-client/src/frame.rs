//! Socket.io v5 over engine.io v4 text frames, default namespace only.

use memesh_api::{Message, UserId};
use memesh_core::transport::ChannelEvent;
use serde_json::Value;

use crate::error::{MemeshClientError, Result};

pub const CONNECT: &str = "40";
pub const PONG: &str = "3";
pub const DISCONNECT: &str = "41";

#[derive(Debug, PartialEq)]
pub enum Frame {
    /// Engine.io open; the namespace connect must follow.
    Open,
    Ping,
    Event(ChannelEvent),
    Ignored,
}

pub fn decode(text: &str) -> Result<Frame> {
    let mut chars = text.chars();
    match chars.next() {
        Some('0') => Ok(Frame::Open),
        Some('1') => Ok(Frame::Event(ChannelEvent::Disconnected)),
        Some('2') => Ok(Frame::Ping),
        Some('4') => decode_packet(chars.as_str()),
        Some(_) => Ok(Frame::Ignored),
        None => Err(MemeshClientError::InvalidFrame("empty".to_string())),
    }
}

fn decode_packet(packet: &str) -> Result<Frame> {
    let mut chars = packet.chars();
    let kind = chars.next();
    let rest = chars.as_str();
    match kind {
        Some('0') => Ok(Frame::Event(ChannelEvent::Connected)),
        Some('1') => Ok(Frame::Event(ChannelEvent::Disconnected)),
        Some('2') => decode_event(rest),
        Some('4') => Ok(Frame::Event(ChannelEvent::Error(connect_error(rest)))),
        Some(_) => Ok(Frame::Ignored),
        None => Err(MemeshClientError::InvalidFrame("missing packet type".to_string())),
    }
}

fn decode_event(rest: &str) -> Result<Frame> {
    // An ack id may precede the payload.
    let payload = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut items: Vec<Value> = serde_json::from_str(payload)?;
    if items.is_empty() {
        return Err(MemeshClientError::InvalidFrame("event without name".to_string()));
    }
    let data = if items.len() > 1 {
        items.swap_remove(1)
    } else {
        Value::Null
    };
    let name = match items.first().and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => return Err(MemeshClientError::InvalidFrame("event name".to_string())),
    };
    let event = match name.as_str() {
        "newMessage" => ChannelEvent::NewMessage(serde_json::from_value::<Message>(data)?),
        "newGlobalMessage" => {
            ChannelEvent::NewGlobalMessage(serde_json::from_value::<Message>(data)?)
        }
        "getOnlineUsers" => {
            ChannelEvent::PresenceSnapshot(serde_json::from_value::<Vec<UserId>>(data)?)
        }
        _ => {
            log::debug!("ignoring socket event {}", name);
            return Ok(Frame::Ignored);
        }
    };
    Ok(Frame::Event(event))
}

fn connect_error(rest: &str) -> String {
    serde_json::from_str::<Value>(rest)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| format!("connect error {}", rest))
}
