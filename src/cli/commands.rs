//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Authenticating event relay with role-based access control", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (TOML)
    #[arg(short, long, env = "TURNSTILE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database URL; overrides the settings file
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay
    Serve {
        /// Address to bind to; overrides the settings file
        #[arg(short, long, env = "TURNSTILE_BIND")]
        bind: Option<String>,

        /// Relay URL clients must name in their auth event; overrides the settings file
        #[arg(long, env = "TURNSTILE_RELAY_URL")]
        relay_url: Option<String>,

        /// Let authors save their own events even without the required role
        #[arg(long)]
        author_bypass: bool,
    },

    /// Manage role assignments
    ///
    /// Examples:
    ///   turnstile role set 5faaae49...394d rw
    ///   turnstile role show 5faaae49...394d
    ///   turnstile role list
    Role {
        #[command(subcommand)]
        command: RoleCommands,
    },

    /// Print a signed authentication event for manual testing
    AuthEvent {
        /// Hex secret key to sign with
        #[arg(long, env = "TURNSTILE_SECRET_KEY")]
        secret: String,

        /// Challenge received from the relay
        #[arg(long)]
        challenge: String,

        /// Relay URL to name in the event; defaults to the configured one
        #[arg(long)]
        relay_url: Option<String>,
    },

    /// Initialize the database schema
    Init,
}

#[derive(Subcommand)]
pub enum RoleCommands {
    /// Replace the roles of a public key
    Set {
        /// Hex public key
        pubkey: String,

        /// Role codes, e.g. `rw` (a = anonymous, r = reader, w = writer, s = service)
        #[arg(value_parser = parse_role_codes)]
        roles: String,
    },

    /// Show the effective roles of a public key
    Show {
        /// Hex public key
        pubkey: String,
    },

    /// List all explicit assignments
    List,
}

fn parse_role_codes(s: &str) -> Result<String, String> {
    turnstile::RoleSet::parse(s)
        .map(|roles| roles.to_string())
        .map_err(|e| e.to_string())
}
