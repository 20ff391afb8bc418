//! Scan duty cycling.
//!
//! The radio alternates between an active scanning window and an idle
//! window. A single task owns the [`ScanSource`] and performs every
//! transition, so a timer-driven stop can never race an in-flight start.
//! Exactly one timer is pending at any time, and shutdown cancels it.

use crate::scanner::{ScanSettings, ScanSource, ServiceFilter};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Default length of a scanning window.
pub const DEFAULT_ACTIVE_WINDOW: Duration = Duration::from_secs(5);
/// Default pause between scanning windows.
pub const DEFAULT_IDLE_WINDOW: Duration = Duration::from_millis(2500);

/// Whether the radio is currently scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Scanning,
}

impl CycleState {
    fn next(self) -> Self {
        match self {
            CycleState::Idle => CycleState::Scanning,
            CycleState::Scanning => CycleState::Idle,
        }
    }
}

/// Durations of the two duty-cycle windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
    pub active_window: Duration,
    pub idle_window: Duration,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            active_window: DEFAULT_ACTIVE_WINDOW,
            idle_window: DEFAULT_IDLE_WINDOW,
        }
    }
}

impl CycleConfig {
    /// How long to stay in `state` before switching.
    pub fn window(&self, state: CycleState) -> Duration {
        match state {
            CycleState::Scanning => self.active_window,
            CycleState::Idle => self.idle_window,
        }
    }
}

/// Handle to a running duty cycle.
///
/// Dropping the handle stops the cycle as well; [`DutyCycler::shutdown`]
/// additionally waits until the source has been stopped.
pub struct DutyCycler {
    state: watch::Receiver<CycleState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DutyCycler {
    /// Take ownership of `source` and start cycling immediately.
    pub fn spawn(
        source: Box<dyn ScanSource>,
        filter: ServiceFilter,
        settings: ScanSettings,
        config: CycleConfig,
    ) -> Self {
        let (state_tx, state) = watch::channel(CycleState::Idle);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_cycle(
            source,
            filter,
            settings,
            config,
            state_tx,
            shutdown_rx,
        ));

        Self {
            state,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Current state of the cycle.
    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.state.clone()
    }

    /// Cancel pending timers, stop the source and wait for the cycle to end.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            log::error!("duty cycle task failed: {e}");
        }
    }
}

/// Perform the transition into `target`. Returns whether it succeeded.
async fn enter(
    source: &mut dyn ScanSource,
    target: CycleState,
    filter: &ServiceFilter,
    settings: &ScanSettings,
) -> bool {
    let result = match target {
        CycleState::Scanning => {
            log::info!("starting scan");
            source.start(filter, settings).await
        }
        CycleState::Idle => {
            log::info!("stopping scan");
            source.stop().await
        }
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            log::warn!("{e}; retrying on next tick");
            false
        }
    }
}

async fn run_cycle(
    mut source: Box<dyn ScanSource>,
    filter: ServiceFilter,
    settings: ScanSettings,
    config: CycleConfig,
    state_tx: watch::Sender<CycleState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut state = CycleState::Idle;
    if enter(source.as_mut(), CycleState::Scanning, &filter, &settings).await {
        state = CycleState::Scanning;
        state_tx.send_replace(state);
    }

    loop {
        // Resolves on an explicit shutdown and when the handle is dropped.
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(config.window(state)) => {}
        }

        let target = state.next();
        if enter(source.as_mut(), target, &filter, &settings).await {
            state = target;
            state_tx.send_replace(state);
        }
    }

    if state == CycleState::Scanning {
        enter(source.as_mut(), CycleState::Idle, &filter, &settings).await;
        state_tx.send_replace(CycleState::Idle);
    }
    log::debug!("duty cycle stopped");
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use climate_beacon_listener::duty_cycle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("2500ms").unwrap(), Duration::from_millis(2500));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let parse = |num: &str, unit: &str| -> Result<u64, String> {
        num.trim()
            .parse()
            .map_err(|_| format!("invalid {unit}: {num}"))
    };

    if let Some(num) = src.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(num, "milliseconds")?));
    }
    let scaled = |num: &str, unit: &str, factor: u64| -> Result<Duration, String> {
        parse(num, unit)?
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("{unit} out of range: {}", num.trim()))
    };

    if let Some(num) = src.strip_suffix('h') {
        return scaled(num, "hours", 3600);
    }
    if let Some(num) = src.strip_suffix('m') {
        return scaled(num, "minutes", 60);
    }
    if let Some(num) = src.strip_suffix('s') {
        return Ok(Duration::from_secs(parse(num, "seconds")?));
    }

    Ok(Duration::from_secs(parse(src, "duration")?))
}

/// Parse a duty-cycle window; like [`parse_duration`] but rejects zero.
pub fn parse_window(src: &str) -> Result<Duration, String> {
    let window = parse_duration(src)?;
    if window.is_zero() {
        return Err("window must be longer than zero".to_string());
    }
    Ok(window)
}
