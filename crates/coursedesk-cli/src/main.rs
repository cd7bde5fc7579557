//! coursedesk - command-line client for the course platform's admin API.
//!
//! Logs in against the backend, keeps the session alive with background
//! token refresh, and issues authenticated requests through the shared
//! session client.

mod prompt;
mod watch;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coursedesk_core::api::{Method, RegisterRequest};
use coursedesk_core::{
    ApiRequest, AuthApi, AuthState, Config, LogoutReason, SessionManager, TokenStore,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "coursedesk", version, about = "Command-line client for the coursedesk admin API")]
struct Cli {
    /// Override the API base URL for this run
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Clear the stored session
    Logout,
    /// Show whether a session is stored
    Status,
    /// Create an account
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Confirm a registration with the one-time code
    VerifyOtp {
        #[arg(long)]
        email: String,
        #[arg(long)]
        otp: String,
    },
    /// Send a new one-time code
    ResendOtp {
        #[arg(long)]
        email: String,
    },
    /// Confirm an email address with the token from the verification mail
    VerifyEmail {
        #[arg(long)]
        token: String,
    },
    /// Request a password reset mail
    ForgotPassword {
        #[arg(long)]
        email: String,
    },
    /// Set a new password with the token from the reset mail
    ResetPassword {
        #[arg(long)]
        token: String,
    },
    /// Send an authenticated request, e.g. `request GET /courses`
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
        /// Query parameter as key=value, repeatable
        #[arg(long = "query", value_parser = parse_key_val)]
        query: Vec<(String, String)>,
    },
    /// Keep the session alive and log out after inactivity.
    /// Each line typed on stdin counts as activity.
    Watch {
        /// Seconds without activity before the warning
        #[arg(long)]
        idle_secs: Option<u64>,
        /// Warning countdown length in seconds
        #[arg(long)]
        warning_seconds: Option<u32>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    if key.is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Initialize the tracing subscriber for logging.
///
/// Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug).
/// When a log directory is configured, logs are also written to a daily file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "coursedesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.clone() {
        config.api_base_url = url;
    }

    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!(api = %config.api_base_url, "coursedesk starting");

    let store = config.open_store()?;
    let (manager, api) = SessionManager::connect(Arc::clone(&store), config.session_options())?;

    match cli.command {
        Command::Login { email } => login(&mut config, &manager, &api, email).await,
        Command::Logout => {
            manager.logout(LogoutReason::User);
            println!("Logged out.");
            Ok(())
        }
        Command::Status => status(&manager, store.as_ref()),
        Command::Register { name, email } => {
            let password = prompt::new_password()?;
            let ack = api
                .register(&RegisterRequest {
                    name,
                    email: email.clone(),
                    password,
                })
                .await?;
            prompt::print_ack(&ack, &format!("Registered. Check {} for a verification code.", email));
            Ok(())
        }
        Command::VerifyOtp { email, otp } => {
            let ack = api.verify_otp(&email, &otp).await?;
            prompt::print_ack(&ack, "Account verified.");
            Ok(())
        }
        Command::ResendOtp { email } => {
            let ack = api.resend_otp(&email).await?;
            prompt::print_ack(&ack, "Verification code sent.");
            Ok(())
        }
        Command::VerifyEmail { token } => {
            let ack = api.verify_email(&token).await?;
            prompt::print_ack(&ack, "Email verified.");
            Ok(())
        }
        Command::ForgotPassword { email } => {
            let ack = api.forgot_password(&email).await?;
            prompt::print_ack(&ack, "If the account exists, a reset link was sent.");
            Ok(())
        }
        Command::ResetPassword { token } => {
            let password = prompt::new_password()?;
            let ack = api.reset_password(&token, &password).await?;
            prompt::print_ack(&ack, "Password updated. You can log in now.");
            Ok(())
        }
        Command::Request {
            method,
            path,
            data,
            query,
        } => request(&manager, &method, &path, data.as_deref(), query).await,
        Command::Watch {
            idle_secs,
            warning_seconds,
        } => {
            let mut idle = config.idle_config();
            if let Some(secs) = idle_secs {
                idle.idle_duration = std::time::Duration::from_secs(secs);
            }
            if let Some(secs) = warning_seconds {
                idle.warning_seconds = secs;
            }
            watch::run(manager, idle).await
        }
    }
}

async fn login(
    config: &mut Config,
    manager: &Arc<SessionManager>,
    api: &AuthApi,
    email: Option<String>,
) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt::email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        bail!("Email required");
    }
    let password = prompt::password()?;

    eprintln!("Authenticating...");
    match manager.login(api, &email, &password).await {
        Ok(response) => {
            config.last_email = Some(email);
            if let Err(e) = config.save() {
                tracing::warn!(error = %e, "Failed to save config");
            }
            match response.name {
                Some(name) => println!("Logged in as {}.", name),
                None => println!("Login successful."),
            }
            Ok(())
        }
        Err(e) => bail!(prompt::login_error_message(&e)),
    }
}

fn status(manager: &SessionManager, store: &dyn TokenStore) -> Result<()> {
    let session = store.load()?;
    let state = manager.auth_state()?;
    match state {
        AuthState::Authenticated => println!("Logged in."),
        AuthState::RefreshOnly => println!("Session will be renewed on the next request."),
        AuthState::Unauthenticated => println!("Not logged in."),
    }
    if let Some(profile) = session.profile {
        if let Some(name) = profile.name {
            println!("  Name:  {}", name);
        }
        if let Some(email) = profile.email {
            println!("  Email: {}", email);
        }
    }
    if let Some(updated) = session.updated_at {
        println!("  Tokens updated: {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

async fn request(
    manager: &Arc<SessionManager>,
    method: &str,
    path: &str,
    data: Option<&str>,
    query: Vec<(String, String)>,
) -> Result<()> {
    manager.require_auth()?;

    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let mut request = ApiRequest::new(method, path);
    for (key, value) in query {
        request = request.query(key, value);
    }
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(data).context("--data must be valid JSON")?;
        request = request.json(&body)?;
    }

    let response = manager.client().send(&request).await?;
    if !response.is_null() {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}
