//! homekeep CLI - a command-line front-end for the homekeep API.
//!
//! Resumes the persisted session on startup, runs a background connectivity
//! check, then executes a single command.

use std::io::{self, Write};

use anyhow::{Context, Result};
use homekeep_core::{ApiClient, Config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: homekeep <command>

Commands:
  login [email]   Sign in (prompts for the password)
  logout          Sign out and forget the stored session
  whoami          Show the signed-in user
  probe           Check that the API is reachable
  get <path>      GET an API path and print the JSON response";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load()?;
    info!(api = %config.api_base_url, "homekeep starting");

    let client = ApiClient::builder(config.clone())
        .on_session_end(|| eprintln!("Session ended - run `homekeep login` to sign in again."))
        .build()?;

    // Diagnostic only; never waited on
    if runs_background_check(command) {
        let _ = client.probe().spawn();
    }

    match command {
        "login" => login(&client, &mut config, args.get(1).cloned()).await,
        "logout" => {
            client.logout().await;
            println!("Signed out.");
            Ok(())
        }
        "whoami" => whoami(&client).await,
        "probe" => {
            let report = client.probe().check().await;
            println!("{}", report);
            Ok(())
        }
        "get" => {
            let path = args.get(1).context("get needs a path, e.g. `homekeep get /tasks`")?;
            client.resume().await;
            let value: serde_json::Value = client.get_json(path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            Ok(())
        }
    }
}

/// The `probe` command runs the health check itself, so it skips the
/// background one.
fn runs_background_check(command: &str) -> bool {
    command != "probe"
}

async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt_email()?,
    };
    let password =
        rpassword::prompt_password(format!("Password for {}: ", email)).context("Failed to read password")?;

    let session = client.login(&email, &password).await?;

    config.last_email = Some(email.clone());
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Failed to save config");
    }

    let name = session
        .user
        .as_ref()
        .map(|u| u.display_name().to_string())
        .unwrap_or(email);
    println!("Signed in as {}.", name);
    Ok(())
}

async fn whoami(client: &ApiClient) -> Result<()> {
    let session = client.resume().await;
    match session.user {
        Some(user) if session.authenticated => println!("{} <{}>", user.display_name(), user.email),
        _ if session.authenticated => println!("Signed in (identity unavailable offline)."),
        _ => println!("Not signed in."),
    }
    Ok(())
}

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;
    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim().to_string();
    if email.is_empty() {
        anyhow::bail!("An email address is required");
    }
    Ok(email)
}
