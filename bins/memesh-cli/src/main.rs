mod commands;
mod config;

use commands::{Command, CommandError, Target};
use config::{ConfigError, MemeshConfig};
use log::LevelFilter;
use memesh_api::{Conversation, Credential, Draft, Identity, Message};
use memesh_client::{HttpBackend, MemeshClientError};
use memesh_core::error::CoreError;
use memesh_core::event::ClientEvent;
use memesh_core::roster::filter_roster;
use memesh_core::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("client: {0}")]
    Client(#[from] MemeshClientError),
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("{0}")]
    Command(#[from] CommandError),
    #[error("no peer matches {0}")]
    UnknownPeer(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args: Vec<String> = std::env::args().collect();
    let mut path = PathBuf::from("memesh.toml");
    let mut i = 1;
    while i + 1 < args.len() {
        if args[i] == "--config" {
            path = PathBuf::from(&args[i + 1]);
        }
        i += 1;
    }
    let cfg = config::load_config(&path)?;
    init_logging(&cfg);
    let client = init_client(&cfg)?;
    tokio::spawn(print_events(client.clone()));

    match client.restore_session().await {
        Ok(Some(identity)) => println!("welcome back, {}", label(&identity)),
        Ok(None) => println!("not signed in; /signup or /login <secret-key>"),
        Err(err) => log::warn!("session check failed: {}", err),
    }

    let mut roster: Vec<Identity> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match commands::parse(&line) {
            Ok(Command::Quit) => break,
            Ok(command) => command,
            Err(err) => {
                eprintln!("{}", err);
                continue;
            }
        };
        if let Err(err) = run_command(&client, &mut roster, command).await {
            eprintln!("error: {}", err);
        }
    }
    Ok(())
}

fn init_logging(cfg: &MemeshConfig) {
    let level = match cfg.logging.level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

fn init_client(cfg: &MemeshConfig) -> Result<Client, CliError> {
    let backend = HttpBackend::new(cfg.server.api_base_url.clone(), cfg.http.clone())?;
    let connector = backend.realtime_connector(cfg.server.realtime_url.as_deref())?;
    Ok(Client::new(
        cfg.core.clone(),
        Arc::new(backend),
        Arc::new(connector),
    ))
}

async fn run_command(
    client: &Client,
    roster: &mut Vec<Identity>,
    command: Command,
) -> Result<(), CliError> {
    match command {
        Command::Signup => {
            let provisioned = client.provision_identity().await?;
            println!("identity {} created", label(&provisioned.identity));
            println!("secret key (shown once, keep it safe): {}", provisioned.credential.expose());
        }
        Command::Login(secret) => {
            let identity = client.authenticate(&Credential::new(secret)).await?;
            println!("signed in as {}", label(&identity));
        }
        Command::Peers { online_only, query } => {
            *roster = client.list_peers().await?;
            let shown = filter_roster(roster, &query, online_only, client.presence());
            for peer in &shown {
                let mark = if client.is_online(&peer.id) { "*" } else { " " };
                println!("{} {}", mark, label(peer));
            }
            println!("{} shown, {} online", shown.len(), client.online_peer_count());
        }
        Command::Open(target) => {
            let conversation = resolve(client, roster, target).await?;
            client.activate(conversation.clone()).await?;
            let me = client.current_identity();
            for message in client.messages() {
                print_message(&conversation, &message, me.as_ref(), roster);
            }
        }
        Command::Close => client.deactivate(),
        Command::Send(text) => {
            client.send(&Draft::text(text)).await?;
        }
        Command::Image(url) => {
            client.send(&Draft::image(url)).await?;
        }
        Command::Name(name) => {
            let identity = client.update_display_name(&name).await?;
            println!("display name is now {}", identity.display_name);
        }
        Command::Whoami => match client.current_identity() {
            Some(identity) => println!(
                "{} ({:?})",
                label(&identity),
                client.connection_state()
            ),
            None => println!("not signed in"),
        },
        Command::Logout => {
            client.logout().await;
            roster.clear();
            println!("signed out");
        }
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
    Ok(())
}

async fn resolve(
    client: &Client,
    roster: &mut Vec<Identity>,
    target: Target,
) -> Result<Conversation, CliError> {
    let needle = match target {
        Target::Global => return Ok(Conversation::Global),
        Target::Peer(needle) => needle,
    };
    if roster.is_empty() {
        *roster = client.list_peers().await?;
    }
    roster
        .iter()
        .find(|peer| {
            peer.id.value == needle
                || peer.public_label.eq_ignore_ascii_case(&needle)
                || peer.display_name.eq_ignore_ascii_case(&needle)
        })
        .map(|peer| Conversation::Private(peer.id.clone()))
        .ok_or(CliError::UnknownPeer(needle))
}

async fn print_events(client: Client) {
    let mut rx = client.subscribe();
    loop {
        match rx.recv().await {
            Ok(ClientEvent::MessageAppended {
                conversation,
                message,
            }) => {
                let me = client.current_identity();
                print_message(&conversation, &message, me.as_ref(), &[]);
            }
            Ok(ClientEvent::ConnectionLost(reason)) => {
                println!("! real-time connection lost: {}", reason)
            }
            Ok(ClientEvent::PresenceChanged { .. }) => {
                log::debug!("{} peers online", client.online_peer_count())
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => log::warn!("event printer skipped {} events", skipped),
            Err(RecvError::Closed) => return,
        }
    }
}

fn print_message(
    conversation: &Conversation,
    message: &Message,
    me: Option<&Identity>,
    roster: &[Identity],
) {
    let sender = if me.map(|i| &i.id) == Some(&message.sender_id) {
        "you".to_string()
    } else if let Some(name) = message.sender_name.as_deref() {
        name.to_string()
    } else {
        roster
            .iter()
            .find(|peer| peer.id == message.sender_id)
            .map(label)
            .unwrap_or_else(|| message.sender_id.to_string())
    };
    let time = message.created_at.format("%H:%M");
    match (message.text(), message.body.image_ref.as_deref()) {
        (Some(text), Some(image)) => println!("[{}] {} {}: {} <{}>", conversation, time, sender, text, image),
        (Some(text), None) => println!("[{}] {} {}: {}", conversation, time, sender, text),
        (None, Some(image)) => println!("[{}] {} {}: <{}>", conversation, time, sender, image),
        (None, None) => {}
    }
}

fn label(identity: &Identity) -> String {
    if identity.display_name.is_empty() || identity.display_name == identity.public_label {
        identity.public_label.clone()
    } else {
        format!("{} ({})", identity.display_name, identity.public_label)
    }
}

#[cfg(test)]
mod tests;
