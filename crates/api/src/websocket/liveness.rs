//! Heartbeat ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::registry::ConnectionRegistry;

/// Outcome of one heartbeat pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections sent a fresh probe
    pub probed: usize,
    /// Connections dropped for missing the previous probe
    pub terminated: usize,
}

/// Probe every authenticated connection once.
///
/// A connection that has not responded since the previous pass is terminated
/// and deregistered; the rest are sent a ping and marked pending.
pub async fn sweep(registry: &ConnectionRegistry) -> SweepReport {
    let mut report = SweepReport::default();

    for conn in registry.authenticated().await {
        if !conn.check_alive() {
            tracing::info!(
                connection_id = %conn.id,
                identity = ?conn.identity().map(|i| i.as_str()),
                "Terminating unresponsive WebSocket connection"
            );
            conn.terminate();
            registry.deregister(&conn.id).await;
            report.terminated += 1;
            continue;
        }

        if conn.send_ping().is_ok() {
            report.probed += 1;
        }
    }

    if report.terminated > 0 {
        tracing::info!(
            probed = report.probed,
            terminated = report.terminated,
            "Heartbeat sweep completed"
        );
    }

    report
}

/// Run heartbeat sweeps every `interval` until `cancel` fires.
///
/// The first sweep happens one full interval after start.
pub async fn run_heartbeat(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry).await;
            }
            () = cancel.cancelled() => {
                tracing::debug!("Heartbeat loop stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{Connection, Outbound};
    use beacon_shared::Identity;
    use tokio::sync::mpsc;

    async fn authed(
        registry: &ConnectionRegistry,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = registry.register(Connection::new(tx)).await;
        registry.promote(&conn.id, Identity::from("apple:u1")).await;
        (conn, rx)
    }

    #[tokio::test]
    async fn test_sweep_probes_then_terminates_silent_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = authed(&registry).await;

        // First pass: alive from admission, gets a probe
        assert_eq!(
            sweep(&registry).await,
            SweepReport {
                probed: 1,
                terminated: 0,
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);

        // No pong: second pass drops it
        assert_eq!(
            sweep(&registry).await,
            SweepReport {
                probed: 0,
                terminated: 1,
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Terminate);
        assert!(!conn.is_open());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_responsive_connection_survives() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = authed(&registry).await;

        for _ in 0..3 {
            let report = sweep(&registry).await;
            assert_eq!(report.terminated, 0);
            conn.mark_alive();
        }
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_sweep_ignores_unauthenticated() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(Connection::new(tx)).await;

        assert_eq!(sweep(&registry).await, SweepReport::default());
        assert_eq!(sweep(&registry).await, SweepReport::default());
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_loop_stops_on_cancel() {
        let registry = Arc::new(ConnectionRegistry::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&registry),
            Duration::from_secs(100),
            cancel.clone(),
        ));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeat_loop_reclaims_dead_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_conn, _rx) = authed(&registry).await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            Arc::clone(&registry),
            Duration::from_millis(20),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.connection_count().await, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
