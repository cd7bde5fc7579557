//! Interactive prompts and user-facing messages.

use std::io::{self, Write};

use anyhow::{bail, Result};
use coursedesk_core::api::Ack;
use coursedesk_core::{ApiError, SessionError};

/// Prompt for an email, offering the last used one as default
pub fn email(last_email: Option<&str>) -> Result<String> {
    match last_email {
        Some(last) => print!("Email [{}]: ", last),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    Ok(match (input.is_empty(), last_email) {
        (true, Some(last)) => last.to_string(),
        _ => input.to_string(),
    })
}

pub fn password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ")?;
    Ok(password)
}

/// Prompt for a new password twice
pub fn new_password() -> Result<String> {
    let password = rpassword::prompt_password("New password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

/// Print the server's message, or a default when it sent none
pub fn print_ack(ack: &Ack, default: &str) {
    match ack.message.as_deref() {
        Some(message) if !message.is_empty() => println!("{}", message),
        _ => println!("{}", default),
    }
}

/// Map a login failure to something a user can act on
pub fn login_error_message(err: &SessionError) -> String {
    match err {
        SessionError::Api(ApiError::Unauthorized) | SessionError::Api(ApiError::AccessDenied(_)) => {
            "Invalid email or password".to_string()
        }
        SessionError::Api(ApiError::NetworkError(e)) if e.is_timeout() => {
            "Connection timed out. Please try again.".to_string()
        }
        SessionError::Api(ApiError::NetworkError(_)) => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        SessionError::Api(ApiError::RateLimited) => {
            "Too many attempts. Please wait before retrying.".to_string()
        }
        other => format!("Login failed: {}", other),
    }
}
