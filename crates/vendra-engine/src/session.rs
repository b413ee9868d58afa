//! # Session Manager
//!
//! The one authenticated session of a terminal.
//!
//! ## State Machine
//! ```text
//!                 start_session
//!   ┌───────────┐ ───────────────► ┌──────────┐   logout    ┌───────────┐
//!   │ Anonymous │                  │  Active  │ ──────────► │ LoggedOut │
//!   └───────────┘                  └────┬─────┘             └───────────┘
//!                                       │ idle ≥ timeout
//!                                       │ (watchdog tick or touch)
//!                                       ▼
//!                                  ┌──────────┐
//!                                  │ Expired  │
//!                                  └──────────┘
//!
//!   start_session from any state replaces whatever was there.
//! ```
//!
//! All state lives behind one mutex; the watchdog and user operations go
//! through the same methods. Idleness is measured on the tokio clock so
//! tests can pause and advance it.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use vendra_core::{Principal, Role};

use crate::error::{EngineError, EngineResult};

/// Externally visible phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Active,
    Expired,
    LoggedOut,
}

/// Snapshot of an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub principal: Principal,
    pub started_at: DateTime<Utc>,
    /// Time since the last session-scoped operation.
    pub idle: Duration,
}

#[derive(Debug)]
struct ActiveSession {
    principal: Principal,
    started_at: DateTime<Utc>,
    last_activity: Instant,
}

#[derive(Debug)]
enum SessionState {
    Anonymous,
    Active(ActiveSession),
    /// `reported` is false while the expiry still has to be handed to the
    /// watchdog (cart discard and notification).
    Expired { principal: Principal, reported: bool },
    LoggedOut,
}

/// Guards the session state machine.
#[derive(Debug)]
pub struct SessionManager {
    state: Mutex<SessionState>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        SessionManager {
            state: Mutex::new(SessionState::Anonymous),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a session for `principal`, ending any previous one.
    pub async fn start_session(&self, principal: Principal) -> SessionInfo {
        let mut state = self.state.lock().await;

        if let SessionState::Active(previous) = &*state {
            info!(user_id = %previous.principal.id, "Ending previous session");
        }

        let session = ActiveSession {
            principal: principal.clone(),
            started_at: Utc::now(),
            last_activity: Instant::now(),
        };
        let info = SessionInfo {
            principal,
            started_at: session.started_at,
            idle: Duration::ZERO,
        };
        *state = SessionState::Active(session);

        info!(
            user_id = %info.principal.id,
            username = %info.principal.username,
            role = %info.principal.role,
            "Session started"
        );
        info
    }

    /// Records activity and returns the session's principal.
    ///
    /// An Active session that has been idle past the timeout is expired
    /// here, before any work is done on its behalf.
    ///
    /// ## Returns
    /// * `Err(EngineError::NotAuthenticated)` - No Active session, or it
    ///   just expired
    pub async fn touch(&self) -> EngineResult<Principal> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let idle_past_timeout = match &*state {
            SessionState::Active(session) => self.is_idle(session, now),
            _ => return Err(EngineError::NotAuthenticated),
        };

        if idle_past_timeout {
            self.expire(&mut state, false);
            return Err(EngineError::NotAuthenticated);
        }

        match &mut *state {
            SessionState::Active(session) => {
                session.last_activity = now;
                Ok(session.principal.clone())
            }
            _ => Err(EngineError::NotAuthenticated),
        }
    }

    /// Principal of the Active session, without counting as activity.
    pub async fn current(&self) -> Option<Principal> {
        let state = self.state.lock().await;
        self.active(&state, Instant::now())
            .map(|session| session.principal.clone())
    }

    pub async fn info(&self) -> Option<SessionInfo> {
        let state = self.state.lock().await;
        let now = Instant::now();
        self.active(&state, now).map(|session| SessionInfo {
            principal: session.principal.clone(),
            started_at: session.started_at,
            idle: now.saturating_duration_since(session.last_activity),
        })
    }

    pub async fn status(&self) -> SessionStatus {
        match &*self.state.lock().await {
            SessionState::Anonymous => SessionStatus::Anonymous,
            SessionState::Active(_) => SessionStatus::Active,
            SessionState::Expired { .. } => SessionStatus::Expired,
            SessionState::LoggedOut => SessionStatus::LoggedOut,
        }
    }

    /// Ends the Active session. Returns who was logged out.
    pub async fn logout(&self) -> Option<Principal> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SessionState::LoggedOut) {
            SessionState::Active(session) => {
                info!(user_id = %session.principal.id, "Session ended by logout");
                Some(session.principal)
            }
            previous => {
                *state = previous;
                None
            }
        }
    }

    pub async fn is_active(&self) -> bool {
        self.current().await.is_some()
    }

    pub async fn is_admin(&self) -> bool {
        self.has_role(Role::Admin).await
    }

    pub async fn is_manager(&self) -> bool {
        self.has_role(Role::Manager).await
    }

    /// Like [`touch`](Self::touch), then insists on the ADMIN role.
    pub async fn require_admin(&self) -> EngineResult<Principal> {
        let principal = self.touch().await?;
        if !principal.is_admin() {
            debug!(user_id = %principal.id, "Admin action refused");
            return Err(EngineError::PermissionDenied {
                required: Role::Admin,
            });
        }
        Ok(principal)
    }

    /// Expires the session if it has been idle for at least the timeout at
    /// `now`. Also hands over an expiry that `touch` performed since the
    /// last call. Returns the principal whose session ended, exactly once
    /// per expiry.
    pub async fn expire_if_idle(&self, now: Instant) -> Option<Principal> {
        let mut state = self.state.lock().await;

        let idle_past_timeout =
            matches!(&*state, SessionState::Active(session) if self.is_idle(session, now));
        if idle_past_timeout {
            return self.expire(&mut state, true);
        }

        match &mut *state {
            SessionState::Expired {
                principal,
                reported,
            } if !*reported => {
                *reported = true;
                Some(principal.clone())
            }
            _ => None,
        }
    }

    async fn has_role(&self, role: Role) -> bool {
        let state = self.state.lock().await;
        self.active(&state, Instant::now())
            .is_some_and(|session| session.principal.role == role)
    }

    fn active<'a>(&self, state: &'a SessionState, now: Instant) -> Option<&'a ActiveSession> {
        match state {
            SessionState::Active(session) if !self.is_idle(session, now) => Some(session),
            _ => None,
        }
    }

    fn is_idle(&self, session: &ActiveSession, now: Instant) -> bool {
        now.saturating_duration_since(session.last_activity) >= self.timeout
    }

    /// Active → Expired. Returns the principal whose session ended.
    fn expire(&self, state: &mut SessionState, reported: bool) -> Option<Principal> {
        match std::mem::replace(state, SessionState::LoggedOut) {
            SessionState::Active(session) => {
                info!(
                    user_id = %session.principal.id,
                    timeout_secs = self.timeout.as_secs(),
                    "Session expired after inactivity"
                );
                let principal = session.principal;
                *state = SessionState::Expired {
                    principal: principal.clone(),
                    reported,
                };
                Some(principal)
            }
            previous => {
                *state = previous;
                None
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
