//! Collabo CLI - log in to Collabo and make authenticated API calls.
//!
//! A thin view over `collabo_core::Mediator`: every command goes through the
//! same session and request path the other Collabo views use.

mod cli;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use collabo_core::api::{AuthError, NoopNavigator, SignupForm};
use collabo_core::auth::{TokenClaims, TokenStatus};
use collabo_core::{Config, Mediator, RequestError, RequestOptions};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Command, USAGE};

/// Directory for the optional log file
const LOG_DIR_ENV: &str = "COLLABO_LOG_DIR";

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the log file on drop.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "collabo.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    let mediator = Mediator::from_config(&config, Arc::new(NoopNavigator))?;
    info!(?command, "Running command");

    match command {
        Command::Login { email } => login(&mediator, &mut config, email).await,
        Command::Signup => signup(&mediator).await,
        Command::Logout => {
            mediator.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Status => {
            status(&mediator);
            Ok(())
        }
        Command::Request { method, path, body } => {
            let mut options = RequestOptions::default().method(method);
            if let Some(body) = body {
                options = options.body(body);
            }
            match mediator.request(&path, options).await {
                Ok(value) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    Ok(())
                }
                Err(RequestError::SessionExpired) => {
                    eprintln!("Session expired. Run `collabo login` to sign in again.");
                    Err(RequestError::SessionExpired.into())
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Help => Ok(()),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read input")?;
    Ok(line.trim().to_string())
}

async fn login(mediator: &Mediator, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    match mediator.login(&email, &password).await {
        Ok(_) => {
            config.last_email = Some(email.clone());
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Could not remember last email");
            }
            println!("Logged in as {}.", email);
            Ok(())
        }
        Err(AuthError::Request(RequestError::Status { status: 401, message, .. })) => {
            anyhow::bail!("Login failed: {}", message)
        }
        Err(e) => Err(e).context("Login failed"),
    }
}

async fn signup(mediator: &Mediator) -> Result<()> {
    let form = SignupForm {
        name: prompt("Full name")?,
        email: prompt("Email")?,
        password: rpassword::prompt_password("Password: ").context("Failed to read password")?,
        confirm_password: rpassword::prompt_password("Confirm password: ")
            .context("Failed to read password")?,
    };

    match mediator.signup(&form).await {
        Ok(response) => {
            println!(
                "{}",
                response
                    .message
                    .as_deref()
                    .unwrap_or("Sign up successful.")
            );
            if !mediator.is_authenticated() {
                println!("Run `collabo login {}` to sign in.", form.email);
            }
            Ok(())
        }
        Err(AuthError::Invalid(problems)) => {
            for problem in &problems {
                eprintln!("  - {}", problem);
            }
            anyhow::bail!("Sign up form is invalid")
        }
        Err(e) => Err(e).context("Sign up failed"),
    }
}

fn status(mediator: &Mediator) {
    println!("API:    {}", mediator.base_address());

    let Some(token) = mediator.token() else {
        println!("Status: not logged in");
        return;
    };
    println!("Status: logged in");

    let Ok(claims) = TokenClaims::decode(&token) else {
        return;
    };
    if let Some(email) = claims.email.as_deref().or(claims.sub.as_deref()) {
        println!("User:   {}", email);
    }
    if let Some(expiry) = claims.expires_at() {
        let local = expiry.with_timezone(&Local).format("%Y-%m-%d %H:%M");
        match claims.status_at(chrono::Utc::now()) {
            TokenStatus::Expired => println!("Token:  expired at {} (server will ask for login)", local),
            status => println!(
                "Token:  expires {} ({} min left)",
                local,
                status.minutes_remaining().unwrap_or(0)
            ),
        }
    }
}
