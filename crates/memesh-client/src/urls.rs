use memesh_api::{Conversation, UserId};

use crate::error::{MemeshClientError, Result};

pub fn validated_base(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(MemeshClientError::InvalidBaseUrl);
    }
    if trimmed.len() < 8 {
        return Err(MemeshClientError::InvalidBaseUrl);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

pub fn signup(base_url: &str) -> Result<String> {
    Ok(format!("{}/auth/signup", validated_base(base_url)?))
}

pub fn login(base_url: &str) -> Result<String> {
    Ok(format!("{}/auth/login", validated_base(base_url)?))
}

pub fn logout(base_url: &str) -> Result<String> {
    Ok(format!("{}/auth/logout", validated_base(base_url)?))
}

pub fn check(base_url: &str) -> Result<String> {
    Ok(format!("{}/auth/check", validated_base(base_url)?))
}

pub fn update_profile(base_url: &str) -> Result<String> {
    Ok(format!("{}/auth/update-profile", validated_base(base_url)?))
}

pub fn users(base_url: &str) -> Result<String> {
    Ok(format!("{}/messages/users", validated_base(base_url)?))
}

pub fn history(base_url: &str, conversation: &Conversation) -> Result<String> {
    let base = validated_base(base_url)?;
    match conversation {
        Conversation::Global => Ok(format!("{}/messages/global", base)),
        Conversation::Private(peer) => Ok(format!("{}/messages/{}", base, path_id(peer)?)),
    }
}

pub fn send(base_url: &str, conversation: &Conversation) -> Result<String> {
    let base = validated_base(base_url)?;
    match conversation {
        Conversation::Global => Ok(format!("{}/messages/global/send", base)),
        Conversation::Private(peer) => Ok(format!("{}/messages/send/{}", base, path_id(peer)?)),
    }
}

/// Engine.io v4 WebSocket endpoint for an http(s) base.
pub fn socket_io(base_url: &str) -> Result<String> {
    let base = validated_base(base_url)?;
    let ws = match base.strip_prefix("https://") {
        Some(rest) => format!("wss://{}", rest),
        None => format!("ws://{}", base.trim_start_matches("http://")),
    };
    Ok(format!("{}/socket.io/?EIO=4&transport=websocket", ws))
}

fn path_id(id: &UserId) -> Result<&str> {
    let value = id.value.as_str();
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(MemeshClientError::InvalidInput("peer id"));
    }
    Ok(value)
}
