// nexus — Peer-to-Peer Text Messenger CLI
//
// Terminal client: registers with the rendezvous, dials peers, fans text out
// to every open channel. Stdin runs in its own thread and talks to the node
// loop through a command channel — network events never wait on the prompt.

mod config;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use nexus_core::connection::local::{LoopbackEngineFactory, LoopbackNet};
use nexus_core::node::{ClientNode, NodeEvent, NodeHandle};
use nexus_core::signaling;
use std::sync::Arc;
use store::{Direction, Store};

#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Nexus — peer-to-peer text messaging", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the rendezvous and start messaging
    Start {
        /// Peer identity to register as
        peer_id: String,
        /// Rendezvous server URL (overrides config)
        #[arg(short, long)]
        server: Option<String>,
    },
    /// List known contacts
    Contacts,
    /// Show message history with a contact
    History {
        contact: String,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { peer_id, server } => cmd_start(peer_id, server).await,
        Commands::Contacts => cmd_contacts(),
        Commands::History { contact, limit } => cmd_history(contact, limit),
        Commands::Config { action } => cmd_config(action),
    }
}

async fn cmd_start(peer_id: String, server: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    let server_url = server.unwrap_or_else(|| config.server_url.clone());
    let store = Store::open(config.data_dir()?.join("store"))?;

    println!("{}", "Starting Nexus...".bold());
    println!("  ID:     {}", peer_id.bright_cyan());
    println!("  Server: {}", server_url);
    println!();

    let connection = signaling::connect(&server_url)
        .await
        .context("Could not reach the rendezvous server")?;

    let net = Arc::new(LoopbackNet::new());
    let factory = Arc::new(LoopbackEngineFactory::new(net, &peer_id));
    let (node, handle, mut events) =
        ClientNode::new(&peer_id, factory, connection.requests, connection.events);
    let node_task = tokio::spawn(node.run());

    spawn_input_loop(handle.clone());

    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::Registered { peer_id } => {
                println!("{} registered as {}", "✓".green(), peer_id.bright_cyan());
                print_repl_help();
            }
            NodeEvent::PeerList { peers } => {
                if peers.is_empty() {
                    println!("{}", "No other peers online.".dimmed());
                } else {
                    println!("{}", "Peers online:".bold());
                    for (peer, connected) in peers {
                        let status = if connected {
                            "connected".green().to_string()
                        } else {
                            "not connected".dimmed().to_string()
                        };
                        println!("  {} {} ({})", "•".bright_green(), peer.bright_cyan(), status);
                    }
                }
            }
            NodeEvent::Message { from, text } => {
                println!("{} {}", format!("{from}:").bright_cyan().bold(), text);
                if let Err(e) = store.add_message(&from, &text, Direction::Received) {
                    tracing::warn!("could not record message from {}: {}", from, e);
                }
            }
            NodeEvent::ChannelOpen { peer } => {
                println!("{} channel open with {}", "✓".green(), peer.bright_cyan());
                if let Err(e) = store.add_contact(&peer) {
                    tracing::warn!("could not record contact {}: {}", peer, e);
                }
            }
            NodeEvent::ChannelClosed { peer } => {
                println!("{} channel closed with {}", "✗".red(), peer);
            }
            NodeEvent::Delivered { text, count, peers } => {
                println!("{}", format!("sent to {count} peer(s)").dimmed());
                for peer in peers {
                    if let Err(e) = store.add_message(&peer, &text, Direction::Sent) {
                        tracing::warn!("could not record message to {}: {}", peer, e);
                    }
                }
            }
            NodeEvent::Error { message } => {
                println!("{} {}", "error:".red().bold(), message);
            }
        }
    }

    let _ = node_task.await;
    println!("{}", "Goodbye.".dimmed());
    Ok(())
}

/// Blocking stdin reader in its own thread; everything it learns goes to the
/// node through the command channel.
fn spawn_input_loop(handle: NodeHandle) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) => {
                    handle.shutdown();
                    break;
                }
                Ok(_) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    if input == "exit" {
                        handle.shutdown();
                        break;
                    } else if input == "list" {
                        handle.list_peers();
                    } else if let Some(peer) = input.strip_prefix("call ") {
                        handle.call(peer.trim());
                    } else {
                        handle.broadcast(input);
                    }
                }
                Err(_) => {
                    handle.shutdown();
                    break;
                }
            }
        }
    });
}

fn print_repl_help() {
    println!();
    println!("{}", "Commands:".bold());
    println!("  {}         show peers online", "list".bright_green());
    println!("  {}  connect to a peer", "call <peer>".bright_green());
    println!("  {}         quit", "exit".bright_green());
    println!("  anything else is sent to every connected peer");
    println!();
}

fn open_store() -> Result<Store> {
    let config = config::Config::load()?;
    Store::open(config.data_dir()?.join("store"))
}

fn cmd_contacts() -> Result<()> {
    let store = open_store()?;
    let contacts = store.list_contacts()?;

    if contacts.is_empty() {
        println!("{}", "No contacts yet.".dimmed());
    } else {
        println!("{} ({} total)", "Contacts".bold(), contacts.len());
        println!();
        for contact in contacts {
            println!("  {} {}", "•".bright_green(), contact.name.bright_cyan());
        }
    }
    Ok(())
}

fn cmd_history(contact: String, limit: usize) -> Result<()> {
    let store = open_store()?;
    let messages = store.list_messages(&contact)?;

    if messages.is_empty() {
        println!("{}", format!("No messages with {contact}.").dimmed());
        return Ok(());
    }

    let start = messages.len().saturating_sub(limit);
    for record in &messages[start..] {
        let who = match record.direction {
            Direction::Sent => "me".bright_yellow(),
            Direction::Received => record.contact.as_str().bright_cyan(),
        };
        println!(
            "  {} {} {}",
            record.timestamp_display().dimmed(),
            format!("{who}:").bold(),
            record.text
        );
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} {} = {}", "✓".green(), key, value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{key} = {value}"),
            None => println!("{}", format!("Unknown config key: {key}").dimmed()),
        },
        ConfigAction::List => {
            for (key, value) in config.list() {
                println!("  {key} = {value}");
            }
        }
    }
    Ok(())
}
