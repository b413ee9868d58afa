//! # Inactivity Watchdog
//!
//! Background task that ends idle sessions.
//!
//! ## Loop
//! ```text
//!   ┌──────────────────────────────────────────────────────────┐
//!   │  every `period`:                                          │
//!   │    session.expire_if_idle(now)                            │
//!   │        │ Some(principal)                                  │
//!   │        ├──► cart.discard_after_expiry() (PENDING → VOID)  │
//!   │        └──► emitter.session_expired(principal)            │
//!   │                                                           │
//!   │  rearm    → restart the period from now                   │
//!   │  shutdown → exit the loop                                 │
//!   └──────────────────────────────────────────────────────────┘
//! ```
//!
//! An idle session is therefore ended at most one `period` after its
//! timeout. Operations attempted in between fail on their own, because
//! `touch` checks the deadline too.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cart::CartHandle;
use crate::error::{EngineError, EngineResult};
use crate::events::PosEventEmitter;
use crate::session::SessionManager;

/// Periodically expires the session of an idle terminal.
pub struct SessionWatchdog {
    session: Arc<SessionManager>,
    cart: CartHandle,
    emitter: Arc<dyn PosEventEmitter>,
    period: Duration,
    shutdown_rx: mpsc::Receiver<()>,
    rearm_rx: mpsc::Receiver<()>,
}

/// Controls a running [`SessionWatchdog`].
pub struct WatchdogHandle {
    shutdown_tx: mpsc::Sender<()>,
    rearm_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Restarts the check period, e.g. right after a login.
    pub fn rearm(&self) {
        // A full channel already has a rearm queued
        let _ = self.rearm_tx.try_send(());
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the watchdog and waits for its task to end.
    pub async fn shutdown(self) -> EngineResult<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| EngineError::Internal(format!("Watchdog task failed: {e}")))
    }
}

impl SessionWatchdog {
    /// Starts the watchdog on the current runtime.
    pub fn spawn(
        session: Arc<SessionManager>,
        cart: CartHandle,
        emitter: Arc<dyn PosEventEmitter>,
        period: Duration,
    ) -> WatchdogHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (rearm_tx, rearm_rx) = mpsc::channel(1);

        let watchdog = SessionWatchdog {
            session,
            cart,
            emitter,
            period,
            shutdown_rx,
            rearm_rx,
        };
        let task = tokio::spawn(watchdog.run());

        WatchdogHandle {
            shutdown_tx,
            rearm_tx,
            task,
        }
    }

    async fn run(mut self) {
        info!(period_secs = self.period.as_secs(), "Session watchdog starting");

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check(Instant::now()).await;
                }

                Some(()) = self.rearm_rx.recv() => {
                    debug!("Session watchdog rearmed");
                    interval.reset();
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Session watchdog shutting down");
                    break;
                }
            }
        }
    }

    async fn check(&self, now: Instant) {
        let Some(principal) = self.session.expire_if_idle(now).await else {
            return;
        };

        if let Some(sale) = self.cart.discard_after_expiry(&principal).await {
            warn!(
                user_id = %principal.id,
                sale_number = %sale.sale_number,
                lines = sale.lines.len(),
                "Pending sale voided on session expiry"
            );
        }
        self.emitter.session_expired(&principal);
    }
}
