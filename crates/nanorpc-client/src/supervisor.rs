//! Reconnection supervisor: dials, runs one session at a time, and redials
//! after the configured back-off.
//!
//! ```text
//!            Start
//!   Idle ───────────► Dialing ──(dial ok)──► Connected ──(session up)──► Running
//!    ▲                 │  ▲                                                 │
//!    │   terminal      │  │ dial error, wait                 I/O error,    │
//!    ├─────────────────┘  └───┘                              cancel, close │
//!    │                                                                      ▼
//!    └──────────────(drained, on_disconnect)────────────────────────── Closing
//! ```
//!
//! The supervisor itself knows nothing about requests; everything
//! session-specific happens in the [`SessionHooks`] it drives.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::reconnect::MIN_RECONNECT_DELAY;
use crate::transport::{self, ConnInfo, Connection};
use crate::types::{Error, Result};

/// Lifecycle state of the transport association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Dialing,
    Connected,
    Running,
    Closing,
}

/// Callbacks the supervisor drives.  Implemented by the client core.
#[async_trait::async_trait]
pub trait SessionHooks: Send + Sync + 'static {
    /// Session factory.  `ctx` scopes the new session; an error aborts it.
    async fn on_transport_connected(&self, ctx: CancellationToken, conn: Connection)
        -> Result<()>;

    /// Blocks for the life of the session.  Its result is what the
    /// supervisor observes as "session done".
    async fn on_session_run(&self, ctx: CancellationToken) -> Result<()>;

    /// Runs after the session ended; drains callbacks.  An error stops
    /// the supervisor.
    async fn on_transport_disconnected(&self, conn: &ConnInfo) -> Result<()>;

    /// Classifies a dial failure (`conn == None`) or session error.
    /// `Ok(())` keeps the supervisor going; `Err(e)` stops it with `e`.
    async fn on_transport_error(&self, conn: Option<&ConnInfo>, err: Error) -> Result<()>;
}

pub struct Supervisor<H> {
    hooks: H,
    transport: TransportConfig,
    state: Arc<watch::Sender<State>>,
    shutdown: CancellationToken,
}

impl<H: SessionHooks> Supervisor<H> {
    pub fn new(
        hooks: H,
        transport: TransportConfig,
        state: Arc<watch::Sender<State>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            hooks,
            transport,
            state,
            shutdown,
        }
    }

    fn set_state(&self, state: State) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(?previous, ?state, "supervisor state");
        }
    }

    /// Drive the state machine until shutdown or a terminal error.
    ///
    /// Returns `Ok(())` when `shutdown` was cancelled.
    pub async fn run(self) -> Result<()> {
        let result = self.run_inner().await;
        self.set_state(State::Idle);
        match &result {
            Ok(()) => tracing::info!(remote = %self.transport.remote, "client stopped"),
            Err(e) => tracing::error!(remote = %self.transport.remote, error = %e, "client stopped"),
        }
        result
    }

    async fn run_inner(&self) -> Result<()> {
        let remote = &self.transport.remote;
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            self.set_state(State::Dialing);
            tracing::debug!(remote = %remote, attempt, "dialing");

            let dialed = tokio::select! {
                r = transport::dial(remote, self.transport.dial_timeout) => r,
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            match dialed {
                Err(e) => {
                    self.hooks.on_transport_error(None, e).await?;
                }
                Ok(conn) => {
                    if self.serve(conn).await? {
                        // Only a session that reached Running resets back-off.
                        attempt = 0;
                    }
                }
            }

            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            let Some(delay) = self.transport.backoff.delay_for_attempt(attempt) else {
                return Err(Error::ReconnectExhausted(attempt));
            };
            let delay = delay.max(MIN_RECONNECT_DELAY);
            tracing::info!(
                remote = %remote,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Ok(()),
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// One connection's worth of lifecycle: Connected → Running → Closing →
    /// Idle.  Returns whether the session reached Running.
    async fn serve(&self, conn: Connection) -> Result<bool> {
        let info = conn.info.clone();
        self.set_state(State::Connected);

        let ctx = self.shutdown.child_token();
        let mut reached_running = false;
        let outcome = match self.hooks.on_transport_connected(ctx.clone(), conn).await {
            Ok(()) => {
                self.set_state(State::Running);
                reached_running = true;
                self.hooks.on_session_run(ctx.clone()).await
            }
            Err(e) => Err(e),
        };

        self.set_state(State::Closing);
        ctx.cancel();

        let mut terminal = None;
        if let Err(e) = outcome {
            if let Err(t) = self.hooks.on_transport_error(Some(&info), e).await {
                terminal = Some(t);
            }
        }
        if let Err(e) = self.hooks.on_transport_disconnected(&info).await {
            terminal.get_or_insert(e);
        }
        self.set_state(State::Idle);

        match terminal {
            Some(e) => Err(e),
            None => Ok(reached_running),
        }
    }
}
