//! Turnstile CLI entry point

mod cli;

use crate::cli::{Cli, Commands, RoleCommands};
use anyhow::{Context, Result};
use clap::Parser;
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use turnstile::auth::{AuthorRule, Authenticator, RoleSet};
use turnstile::config::Settings;
use turnstile::event::{Keys, UnsignedEvent};
use turnstile::server::{run_websocket_server, WsState};
use turnstile::storage::{MemoryRoleStore, PostgresConfig, PostgresStore, RoleStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        settings.database_url = Some(url);
    }

    match cli.command {
        Commands::Serve {
            bind,
            relay_url,
            author_bypass,
        } => {
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            if let Some(relay_url) = relay_url {
                settings.relay_url = relay_url;
            }
            serve(settings, author_bypass).await
        }
        Commands::Role { command } => role(&settings, command).await,
        Commands::AuthEvent {
            secret,
            challenge,
            relay_url,
        } => auth_event(&settings, &secret, &challenge, relay_url),
        Commands::Init => init(&settings).await,
    }
}

/// Database settings from the settings file/CLI, else from PG* variables
fn db_config(settings: &Settings) -> Result<Option<PostgresConfig>> {
    match &settings.database_url {
        Some(url) => PostgresConfig::from_url(url)
            .map(Some)
            .context("Invalid DATABASE_URL"),
        None => Ok(PostgresConfig::from_env()),
    }
}

async fn require_db(settings: &Settings) -> Result<PostgresStore> {
    let config = db_config(settings)?.context("DATABASE_URL not set")?;
    Ok(PostgresStore::new(config).await?)
}

async fn serve(settings: Settings, author_bypass: bool) -> Result<()> {
    let role_store: Arc<dyn RoleStore> = match db_config(&settings)? {
        Some(config) => Arc::new(PostgresStore::new(config).await?),
        None => {
            warn!("No database configured; role assignments are kept in memory only");
            Arc::new(MemoryRoleStore::new())
        }
    };

    let mut authenticator = Authenticator::new(
        &settings.authentication,
        settings.relay_url.clone(),
        role_store,
    )
    .context("Invalid authentication policy")?;
    if author_bypass {
        authenticator = authenticator.with_event_rule(AuthorRule);
    }

    info!(
        enabled = authenticator.is_enabled(),
        relay_url = %authenticator.relay_url(),
        "Authentication configured"
    );

    let listener = TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind))?;

    let state = WsState::new(Arc::new(authenticator));

    info!("Starting Turnstile relay...");
    run_websocket_server(listener, state, shutdown_signal()).await?;

    info!("Turnstile relay stopped");
    Ok(())
}

async fn role(settings: &Settings, command: RoleCommands) -> Result<()> {
    let store = require_db(settings).await?;

    match command {
        RoleCommands::Set { pubkey, roles } => {
            let roles = RoleSet::parse(&roles)?;
            store.set_roles(&pubkey, &roles).await?;
            println!("{} -> {}", pubkey, roles);
        }
        RoleCommands::Show { pubkey } => {
            let roles = store.get_roles(&pubkey).await?;
            println!("Pubkey: {}", pubkey);
            println!("Roles:  {}", roles);
        }
        RoleCommands::List => {
            let mut assignments = store.list_roles().await?;
            let mut count = 0;
            while let Some(assignment) = assignments.try_next().await? {
                println!("{}  {}", assignment.pubkey, assignment.roles);
                count += 1;
            }
            if count == 0 {
                println!("(no explicit assignments)");
            }
        }
    }

    Ok(())
}

fn auth_event(
    settings: &Settings,
    secret: &str,
    challenge: &str,
    relay_url: Option<String>,
) -> Result<()> {
    let keys = Keys::parse(secret).context("Invalid secret key")?;
    let relay_url = relay_url.unwrap_or_else(|| settings.relay_url.clone());

    let unsigned = UnsignedEvent::auth(&relay_url, challenge, chrono::Utc::now().timestamp());
    let event = keys.sign(unsigned)?;

    println!("{}", serde_json::json!(["AUTH", event]));
    Ok(())
}

async fn init(settings: &Settings) -> Result<()> {
    let store = require_db(settings).await?;
    println!("Database schema initialized successfully");
    println!("Explicit role assignments: {}", store.count_roles().await?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping server");
}
