//! Inactivity detection with a warning countdown.
//!
//! `IdleMachine` is the pure state machine; `IdleTimer` drives it from a
//! Tokio task fed by an `ActivitySource`:
//!
//! ```text
//! Active --(idle deadline)--> Warning --(countdown hits 0)--> Expired
//!   ^                            |
//!   +-------(any activity)-------+
//! ```
//!
//! `Expired` is terminal. What happens on expiry is decided by
//! `SessionManager::watch_idle`, which logs the user out.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Countdown resolution once the warning is showing
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    /// Time without activity before the warning appears
    pub idle_duration: Duration,
    /// Countdown length once the warning is showing
    pub warning_seconds: u32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_duration: Duration::from_secs(15 * 60),
            warning_seconds: 60,
        }
    }
}

/// User interaction that counts as activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    MouseMove,
    KeyDown,
    Scroll,
    TouchStart,
}

/// A stream of user activity.
///
/// `next_activity` must be cancel-safe: the driver polls it inside
/// `tokio::select!` alongside its timers. `None` means the source is closed.
#[async_trait]
pub trait ActivitySource: Send {
    async fn next_activity(&mut self) -> Option<ActivityEvent>;
}

/// Activity delivered over a Tokio channel.
pub struct ChannelActivitySource {
    rx: mpsc::Receiver<ActivityEvent>,
}

#[async_trait]
impl ActivitySource for ChannelActivitySource {
    async fn next_activity(&mut self) -> Option<ActivityEvent> {
        self.rx.recv().await
    }
}

/// Create a channel-backed activity source and its sending half.
pub fn activity_channel(buffer: usize) -> (mpsc::Sender<ActivityEvent>, ChannelActivitySource) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, ChannelActivitySource { rx })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum IdlePhase {
    Active,
    Warning,
    Expired,
}

/// What the warning overlay renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct IdleSnapshot {
    pub phase: IdlePhase,
    pub show_warning: bool,
    pub countdown: u32,
}

#[derive(Debug, Clone)]
pub struct IdleMachine {
    config: IdleConfig,
    phase: IdlePhase,
    countdown: u32,
}

impl IdleMachine {
    pub fn new(config: IdleConfig) -> Self {
        Self {
            config,
            phase: IdlePhase::Active,
            countdown: config.warning_seconds,
        }
    }

    pub fn config(&self) -> &IdleConfig {
        &self.config
    }

    pub fn phase(&self) -> IdlePhase {
        self.phase
    }

    /// Record activity. Returns false once expired, where activity no
    /// longer counts.
    pub fn on_activity(&mut self) -> bool {
        if self.phase == IdlePhase::Expired {
            return false;
        }
        self.phase = IdlePhase::Active;
        self.countdown = self.config.warning_seconds;
        true
    }

    /// The idle deadline passed without activity
    pub fn on_idle_deadline(&mut self) {
        if self.phase != IdlePhase::Active {
            return;
        }
        self.countdown = self.config.warning_seconds;
        self.phase = if self.countdown == 0 {
            IdlePhase::Expired
        } else {
            IdlePhase::Warning
        };
    }

    /// One countdown second elapsed
    pub fn on_tick(&mut self) {
        if self.phase != IdlePhase::Warning {
            return;
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            self.phase = IdlePhase::Expired;
        }
    }

    pub fn snapshot(&self) -> IdleSnapshot {
        IdleSnapshot {
            phase: self.phase,
            show_warning: self.phase != IdlePhase::Active,
            countdown: self.countdown,
        }
    }
}

/// Runs an `IdleMachine` on a background task.
///
/// Dropping the timer cancels the idle deadline, the countdown ticker and
/// the activity subscription.
pub struct IdleTimer {
    state: watch::Receiver<IdleSnapshot>,
    nudge: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

impl IdleTimer {
    /// Start tracking activity. Must be called within a Tokio runtime.
    pub fn spawn<S>(config: IdleConfig, source: S) -> Self
    where
        S: ActivitySource + 'static,
    {
        let machine = IdleMachine::new(config);
        let (state_tx, state) = watch::channel(machine.snapshot());
        let (nudge, nudge_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(machine, source, state_tx, nudge_rx));
        info!(
            idle_secs = config.idle_duration.as_secs(),
            warning_seconds = config.warning_seconds,
            "Idle timer started"
        );
        Self { state, nudge, task }
    }

    pub fn snapshot(&self) -> IdleSnapshot {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<IdleSnapshot> {
        self.state.clone()
    }

    /// "Stay logged in": counts as activity
    pub fn stay_logged_in(&self) {
        let _ = self.nudge.send(());
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn countdown_ticker() -> Interval {
    let mut ticker = time::interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn drive<S: ActivitySource>(
    mut machine: IdleMachine,
    mut source: S,
    state: watch::Sender<IdleSnapshot>,
    mut nudge: mpsc::UnboundedReceiver<()>,
) {
    let idle = machine.config().idle_duration;
    let deadline = time::sleep(idle);
    tokio::pin!(deadline);
    let mut ticker: Option<Interval> = None;
    let mut source_open = true;

    loop {
        let activity = tokio::select! {
            event = source.next_activity(), if source_open => match event {
                Some(event) => Some(event),
                None => {
                    debug!("Activity source closed");
                    source_open = false;
                    None
                }
            },
            resumed = nudge.recv() => match resumed {
                Some(()) => Some(ActivityEvent::KeyDown),
                None => break,
            },
            _ = &mut deadline, if machine.phase() == IdlePhase::Active => {
                machine.on_idle_deadline();
                info!(countdown = machine.snapshot().countdown, "Idle threshold reached, showing warning");
                if machine.phase() == IdlePhase::Warning {
                    ticker = Some(countdown_ticker());
                }
                state.send_replace(machine.snapshot());
                None
            }
            _ = next_tick(&mut ticker), if ticker.is_some() => {
                machine.on_tick();
                if machine.phase() == IdlePhase::Expired {
                    info!("Idle countdown expired");
                    ticker = None;
                }
                state.send_replace(machine.snapshot());
                None
            }
        };

        if let Some(event) = activity {
            if machine.on_activity() {
                ticker = None;
                deadline.as_mut().reset(Instant::now() + idle);
                state.send_if_modified(|current| {
                    let next = machine.snapshot();
                    let changed = *current != next;
                    *current = next;
                    changed
                });
                debug!(?event, "Activity, idle deadline restarted");
            }
        }
    }
}
