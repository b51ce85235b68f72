//! Periodic background loops: session cleanup, heartbeat tick, data
//! sampling. All three share the coordinator's cancellation token and exit
//! promptly on shutdown. Failures are logged and never abort the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::AppState;

pub fn spawn_background_tasks(
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_session_cleanup(Arc::clone(&state), cancel.clone()),
        spawn_heartbeat(Arc::clone(&state), cancel.clone()),
        spawn_data_sampling(state, cancel),
    ]
}

/// Sweep sessions that are unauthenticated or idle past the TTL.
fn spawn_session_cleanup(state: Arc<AppState>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.sessions.cleanup_interval_seconds);
    let ttl = chrono::Duration::seconds(state.config.sessions.timeout_seconds as i64);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // immediate first tick is a no-op
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = state.sessions.sweep_expired(ttl, Utc::now());
                    if removed > 0 {
                        info!(count = removed, "Expired sessions cleaned");
                    } else {
                        debug!("Session cleanup: nothing to sweep");
                    }
                }
            }
        }
        debug!("Session cleanup loop stopped");
    })
}

/// Wake-only tick; emits no traffic in the base design.
fn spawn_heartbeat(state: Arc<AppState>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.intervals.heartbeat_seconds);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    debug!(subscribers = state.subscribers.len(), "Heartbeat tick");
                }
            }
        }
        debug!("Heartbeat loop stopped");
    })
}

/// Placeholder hook for pulling status from vehicle/regional collaborators.
fn spawn_data_sampling(state: Arc<AppState>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.intervals.data_collection_seconds);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    debug!(sessions = state.sessions.len(), "Data sampling tick");
                }
            }
        }
        debug!("Data sampling loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state;

    #[tokio::test(start_paused = true)]
    async fn session_cleanup_sweeps_idle_sessions() {
        let (state, _temp) = test_state();
        // Stale: last activity far in the past
        let stale = chrono::Utc::now() - chrono::Duration::seconds(7200);
        state.sessions.create("1000000000001", stale);
        state.sessions.create("1000000000002", chrono::Utc::now());

        let cancel = CancellationToken::new();
        let handle = spawn_session_cleanup(Arc::clone(&state), cancel.clone());

        // Jump past one cleanup period (300 s)
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(state.sessions.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn loops_exit_promptly_on_cancellation() {
        let (state, _temp) = test_state();
        let cancel = CancellationToken::new();
        let handles = spawn_background_tasks(Arc::clone(&state), cancel.clone());

        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("loop exited promptly")
                .unwrap();
        }
    }
}
