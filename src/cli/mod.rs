//! CLI command handling.
//!
//! Provides subcommands for:
//! - Reviewing and deciding pairing requests (`pairing list|approve|reject`)
//! - Editing the allow list directly (`allow add|remove|list`)
//! - Inspecting state (`status`)

use clap::{Parser, Subcommand};

use crate::allowlist::AllowListStore;
use crate::config::Config;
use crate::error::StoreError;
use crate::pairing::{PairingRequest, PairingStore};

#[derive(Parser, Debug)]
#[command(name = "chatgate")]
#[command(about = "Pairing-based access control for chat-channel agents")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// State directory (overrides CHATGATE_HOME)
    #[arg(long, global = true)]
    pub state_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage pending pairing requests
    #[command(subcommand)]
    Pairing(PairingCommand),

    /// Manage the allow list
    #[command(subcommand)]
    Allow(AllowCommand),

    /// Show configuration and store state
    Status,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PairingCommand {
    /// List pending pairing requests
    List,
    /// Approve a pairing code and allow-list the sender
    Approve { code: String },
    /// Reject a pairing code
    Reject { code: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AllowCommand {
    /// List allow-list entries
    List,
    /// Add an identifier (id, @username, or *)
    Add { ident: String },
    /// Remove an identifier
    Remove { ident: String },
}

/// Run a pairing subcommand against the configured stores.
pub fn run_pairing_command(config: &Config, cmd: PairingCommand) -> anyhow::Result<()> {
    let pairing = PairingStore::new(&config.state_dir);
    let allow = AllowListStore::new(&config.state_dir);
    run_pairing_command_with_stores(&pairing, &allow, cmd)
}

/// Seam used by integration tests to drive commands against a temp store.
pub fn run_pairing_command_with_stores(
    pairing: &PairingStore,
    allow: &AllowListStore,
    cmd: PairingCommand,
) -> anyhow::Result<()> {
    match cmd {
        PairingCommand::List => {
            let pending = pairing.list()?;
            if pending.is_empty() {
                println!("No pending pairing requests.");
            } else {
                for req in &pending {
                    println!("{}", format_request(req));
                }
            }
            Ok(())
        }
        PairingCommand::Approve { code } => {
            let req = match pairing.approve(&code) {
                Ok(req) => req,
                Err(e @ StoreError::Expired(_)) => {
                    eprintln!("That code was valid but has expired.");
                    eprintln!("Ask the sender to message the bot again for a fresh code.");
                    return Err(e.into());
                }
                Err(e @ StoreError::NotFound(_)) => {
                    eprintln!("No pending request matches that code.");
                    eprintln!("Run `chatgate pairing list` to see current codes.");
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };

            // Promotion is the operator surface's job, not the store's:
            // allow both the numeric id and the username when present.
            allow.add(&req.user_id)?;
            if let Some(username) = &req.username {
                allow.add(username)?;
            }

            println!("Approved {}.", describe_identity(&req));
            Ok(())
        }
        PairingCommand::Reject { code } => {
            let req = match pairing.reject(&code) {
                Ok(req) => req,
                Err(e @ StoreError::Expired(_)) => {
                    eprintln!("That code had already expired; nothing to reject.");
                    return Err(e.into());
                }
                Err(e @ StoreError::NotFound(_)) => {
                    eprintln!("No pending request matches that code.");
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };
            println!("Rejected {}.", describe_identity(&req));
            Ok(())
        }
    }
}

/// Run an allow-list subcommand against the configured store.
pub fn run_allow_command(config: &Config, cmd: AllowCommand) -> anyhow::Result<()> {
    run_allow_command_with_store(&AllowListStore::new(&config.state_dir), cmd)
}

/// Seam used by integration tests.
pub fn run_allow_command_with_store(
    allow: &AllowListStore,
    cmd: AllowCommand,
) -> anyhow::Result<()> {
    match cmd {
        AllowCommand::List => {
            let entries = allow.list()?;
            if entries.is_empty() {
                println!("Allow list is empty.");
            } else {
                for entry in &entries {
                    println!("{entry}");
                }
            }
        }
        AllowCommand::Add { ident } => {
            if allow.add(&ident)? {
                println!("Added {ident}.");
            } else {
                println!("{ident} was already allow-listed.");
            }
        }
        AllowCommand::Remove { ident } => {
            if allow.remove(&ident)? {
                println!("Removed {ident}.");
            } else {
                println!("{ident} was not in the allow list.");
            }
        }
    }
    Ok(())
}

/// Print configuration and store state.
pub fn run_status_command(config: &Config) -> anyhow::Result<()> {
    println!("chatgate status");
    println!("===============\n");
    println!(
        "  Version:      {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    println!("  State dir:    {}", config.state_dir.display());
    println!("  DM policy:    {}", config.policy.dm);
    println!("  Group policy: {}", config.policy.group);
    println!(
        "  Mention gate: {}",
        if config.policy.group_require_mention {
            "required in groups"
        } else {
            "off"
        }
    );

    let pairing = PairingStore::new(&config.state_dir);
    let allow = AllowListStore::new(&config.state_dir);
    match pairing.list() {
        Ok(pending) => println!("  Pending:      {} pairing request(s)", pending.len()),
        Err(e) => println!("  Pending:      unavailable ({e})"),
    }
    match allow.list() {
        Ok(entries) => println!("  Allowed:      {} entr(ies)", entries.len()),
        Err(e) => println!("  Allowed:      unavailable ({e})"),
    }
    Ok(())
}

fn format_request(req: &PairingRequest) -> String {
    let expires = chrono::DateTime::from_timestamp_millis(req.expires_at)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| req.expires_at.to_string());
    format!(
        "{}  {}  (chat {}, expires {})",
        req.code,
        describe_identity(req),
        req.chat_id,
        expires
    )
}

fn describe_identity(req: &PairingRequest) -> String {
    match &req.username {
        Some(username) => format!("user {} (@{username})", req.user_id),
        None => format!("user {}", req.user_id),
    }
}
