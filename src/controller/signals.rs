//! Process signal handling for a [`Controller`].
//!
//! SIGTERM and SIGINT (Ctrl+C) ask for a graceful shutdown; repeating either,
//! or sending SIGQUIT, escalates to a kill.

use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use super::Controller;
use crate::constants::SIGNAL_THREAD_NAME;
use crate::error::{CommonThreadError, Result};

/// What the controller should do about a received signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Shutdown,
    Kill,
}

/// Decides how far to escalate as termination signals keep arriving
#[derive(Debug, Default)]
pub struct SignalEscalation {
    received: usize,
}

impl SignalEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    /// SIGTERM or SIGINT: shut down the first time, kill after that
    pub fn on_terminate(&mut self) -> SignalAction {
        self.received += 1;
        if self.received == 1 {
            SignalAction::Shutdown
        } else {
            SignalAction::Kill
        }
    }

    /// SIGQUIT always kills
    pub fn on_quit(&mut self) -> SignalAction {
        self.received += 1;
        SignalAction::Kill
    }

    pub fn received(&self) -> usize {
        self.received
    }
}

impl Controller {
    /// Listen for termination signals on a dedicated thread
    ///
    /// The thread exits after it has carried out a kill.
    pub fn install_signal_handlers(&self) -> Result<JoinHandle<()>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CommonThreadError::Signal(format!("failed to build signal runtime: {e}")))?;

        let controller = self.clone();
        let handle = thread::Builder::new()
            .name(SIGNAL_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(listen_for_signals(controller)))?;

        info!(
            application = %self.application(),
            "📡 SIGNALS: Handlers installed (SIGTERM/SIGINT shutdown, repeat or SIGQUIT kill)"
        );
        Ok(handle)
    }
}

#[cfg(unix)]
async fn listen_for_signals(controller: Controller) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut interrupt, mut quit) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    ) {
        (Ok(terminate), Ok(interrupt), Ok(quit)) => (terminate, interrupt, quit),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            error!("❌ SIGNALS: Failed to install signal handler: {e}");
            return;
        }
    };

    let mut escalation = SignalEscalation::new();
    loop {
        let action = tokio::select! {
            Some(()) = terminate.recv() => {
                info!("🛑 SIGNALS: Received SIGTERM");
                escalation.on_terminate()
            }
            Some(()) = interrupt.recv() => {
                info!("🛑 SIGNALS: Received SIGINT");
                escalation.on_terminate()
            }
            Some(()) = quit.recv() => {
                info!("💀 SIGNALS: Received SIGQUIT");
                escalation.on_quit()
            }
            else => break,
        };

        if dispatch(&controller, action).await {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(controller: Controller) {
    let mut escalation = SignalEscalation::new();
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ SIGNALS: Failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("🛑 SIGNALS: Received Ctrl+C");
        if dispatch(&controller, escalation.on_terminate()).await {
            break;
        }
    }
}

/// Carry out `action`; true once there is nothing left to escalate to
async fn dispatch(controller: &Controller, action: SignalAction) -> bool {
    let controller = controller.clone();
    match action {
        SignalAction::Shutdown => {
            // Not awaited, so a second signal can still escalate while workers drain.
            tokio::task::spawn_blocking(move || controller.shutdown());
            false
        }
        SignalAction::Kill => {
            if let Err(e) = tokio::task::spawn_blocking(move || controller.kill()).await {
                warn!("⚠️ SIGNALS: Kill did not complete: {e}");
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_terminate_shuts_down_second_kills() {
        let mut escalation = SignalEscalation::new();
        assert_eq!(escalation.on_terminate(), SignalAction::Shutdown);
        assert_eq!(escalation.on_terminate(), SignalAction::Kill);
        assert_eq!(escalation.on_terminate(), SignalAction::Kill);
        assert_eq!(escalation.received(), 3);
    }

    #[test]
    fn test_quit_kills_immediately() {
        let mut escalation = SignalEscalation::new();
        assert_eq!(escalation.on_quit(), SignalAction::Kill);

        let mut escalation = SignalEscalation::new();
        assert_eq!(escalation.on_quit(), SignalAction::Kill);
        // A terminate after a quit is already past the graceful stage
        assert_eq!(escalation.on_terminate(), SignalAction::Kill);
    }
}
