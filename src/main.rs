//! oauth-session - command line front end for the OAuth2 PKCE session client.

#![deny(clippy::all)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oauth_session::auth::callback_server::CallbackListener;
use oauth_session::auth::token_manager::format_duration;
use oauth_session::{AppError, AuthSession, Config};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oauth-session", version, about = "OAuth2 authorization code + PKCE session client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in through the browser.
    Login {
        /// Seconds to wait for the browser to return.
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Print a valid access token, refreshing it if needed.
    Token,
    /// Show the signed-in identity.
    Whoami,
    /// Show whether a session exists and when it expires.
    Status,
    /// Revoke the session and remove stored tokens.
    Logout,
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set at least:");
            eprintln!("  OAUTH_CLIENT_ID=<your-client-id>");
            std::process::exit(2);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli.command, config).await {
        error!("{:#}", e);
        let message = e
            .downcast_ref::<AppError>()
            .map(|app| app.user_message().to_string())
            .unwrap_or_else(|| format!("{:#}", e));
        eprintln!("{}", message);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Command, config: Config) -> Result<()> {
    let session = AuthSession::new(config).context("Failed to initialize session")?;

    match command {
        Command::Login { timeout } => {
            let listener = CallbackListener::bind(&session.config().oauth.redirect_uri)
                .await
                .map_err(AppError::from)?;

            session.begin_authorization().map_err(AppError::from)?;
            println!("Complete the sign-in in your browser...");

            let params = listener
                .wait(Duration::from_secs(timeout))
                .await
                .map_err(AppError::from)?;
            let tokens = session
                .complete_authorization(&params)
                .await
                .map_err(AppError::from)?;

            println!("Signed in. Access token expires at {}", tokens.expires_at);
        }
        Command::Token => match session.access_token().await {
            Some(token) => println!("{}", token.as_str()),
            None => anyhow::bail!("Not signed in"),
        },
        Command::Whoami => match session.user_info().await.map_err(AppError::from)? {
            Some(info) => {
                println!("{} ({})", info.display_name(), info.sub);
                if let Some(email) = &info.email {
                    println!("{}", email);
                }
            }
            None => anyhow::bail!("Not signed in"),
        },
        Command::Status => match session.token_manager().time_until_expiry() {
            Some(remaining) => println!("Signed in, token valid for {}", format_duration(remaining)),
            None if session.token_manager().session_expiry().is_some() => {
                println!("Signed in, access token expired (will refresh on next use)")
            }
            None => println!("Signed out"),
        },
        Command::Logout => {
            session.logout().await;
            println!("Signed out");
        }
    }

    Ok(())
}
