//! `coursedesk watch`: keep a session alive until the user goes idle.
//!
//! Lines on stdin count as activity. The idle warning is rendered to
//! stderr; when the countdown runs out the session manager logs out.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};
use coursedesk_core::{
    activity_channel, ActivityEvent, AuthState, IdleConfig, IdlePhase, IdleSnapshot, IdleTimer,
    LogoutReason, SessionEvent, SessionManager,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{info, warn};

/// Activity events buffered between stdin and the idle timer
const ACTIVITY_BUFFER: usize = 16;

/// Line to show for an idle state change, if any
fn describe(previous: IdlePhase, snapshot: &IdleSnapshot) -> Option<String> {
    match snapshot.phase {
        IdlePhase::Warning => Some(format!(
            "You have been idle. Logging out in {}s - press Enter to stay logged in.",
            snapshot.countdown
        )),
        IdlePhase::Active if previous == IdlePhase::Warning => {
            Some("Welcome back, session kept alive.".to_string())
        }
        IdlePhase::Active | IdlePhase::Expired => None,
    }
}

fn logout_message(reason: LogoutReason) -> &'static str {
    match reason {
        LogoutReason::User => "Logged out.",
        LogoutReason::IdleTimeout => "Logged out after inactivity.",
        LogoutReason::RefreshFailed | LogoutReason::MissingRefreshToken => {
            "Session expired. Run `coursedesk login` to sign in again."
        }
    }
}

/// Print idle state changes until the session ends or `shutdown` completes.
async fn render_until_done(
    mut snapshots: watch::Receiver<IdleSnapshot>,
    mut events: broadcast::Receiver<SessionEvent>,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut phase = IdlePhase::Active;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *snapshots.borrow_and_update();
                if let Some(line) = describe(phase, &snapshot) {
                    eprintln!("{}", line);
                }
                phase = snapshot.phase;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::LoggedOut { reason }) => {
                    eprintln!("{}", logout_message(reason));
                    break;
                }
                Ok(SessionEvent::Refreshed) => info!("Session refreshed"),
                Ok(SessionEvent::LoggedIn) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => break,
        }
    }
}

pub async fn run(manager: Arc<SessionManager>, idle: IdleConfig) -> Result<()> {
    if manager.bootstrap()? == AuthState::Unauthenticated {
        bail!("Not logged in. Run `coursedesk login` first.");
    }

    let (activity, source) = activity_channel(ACTIVITY_BUFFER);
    let idle_timer = IdleTimer::spawn(idle, source);
    let idle_watch = manager.watch_idle(&idle_timer);
    let snapshots = idle_timer.subscribe();
    let events = manager.subscribe();

    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if activity.send(ActivityEvent::KeyDown).await.is_err() {
                break;
            }
        }
    });

    eprintln!("Watching session. Press Enter to stay active, Ctrl+C to quit.");
    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Interrupted");
    };
    render_until_done(snapshots, events, interrupted).await;

    stdin_task.abort();
    idle_watch.abort();
    idle_timer.shutdown();
    manager.refresh_timer().stop();
    Ok(())
}
