//! Process-wide stop flag and signal wiring.
//!
//! SIGUSR1 and SIGHUP are graceful: they set the stop flag and the command
//! loop exits at the next iteration boundary, never mid-operation. SIGTERM
//! and SIGINT are immediate and handled in `main`, racing the loop itself.

use servo_protocol::StopMode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

const STOP_NONE: u8 = 0;
const STOP_EXIT: u8 = 1;
const STOP_RESTART: u8 = 2;

/// Tri-state stop request: none → exit | restart, set once. Single writer
/// (the signal task), single reader (the command loop), so a relaxed-ish
/// atomic cell is all the synchronization needed.
#[derive(Debug, Clone, Default)]
pub struct StopFlag {
    state: Arc<AtomicU8>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stop request. The first request wins; later ones are ignored
    /// so a restart cannot be downgraded mid-flight (and vice versa).
    pub fn request(&self, mode: StopMode) {
        let value = match mode {
            StopMode::Exit => STOP_EXIT,
            StopMode::Restart => STOP_RESTART,
        };
        let _ = self
            .state
            .compare_exchange(STOP_NONE, value, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<StopMode> {
        match self.state.load(Ordering::SeqCst) {
            STOP_EXIT => Some(StopMode::Exit),
            STOP_RESTART => Some(StopMode::Restart),
            _ => None,
        }
    }
}

/// Install the graceful listeners: SIGUSR1 stops after the current command,
/// SIGHUP restarts after it.
pub fn spawn_graceful_listeners(stop: StopFlag) -> std::io::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut hup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = usr1.recv() => {
                    info!("SIGUSR1 received; stopping after the current command");
                    stop.request(StopMode::Exit);
                }
                _ = hup.recv() => {
                    info!("SIGHUP received; restarting after the current command");
                    stop.request(StopMode::Restart);
                }
            }
        }
    });

    Ok(())
}
