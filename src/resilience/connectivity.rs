//! Periodic connectivity check that turns health changes into alerts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ResilienceMonitor;
use super::alert::AlertThrottle;
use crate::models::{CircuitState, ResilienceSnapshot};
use crate::traits::MirrorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertPriority {
    Info,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityAlert {
    /// Backend calls are being short-circuited.
    CircuitOpen {
        consecutive_errors: u32,
        retry_after: Option<Duration>,
    },
    /// Calls are failing but still attempted. Dismissible.
    Degraded {
        consecutive_errors: u32,
        success_rate: f64,
    },
    /// Health is back after an alert. Clears any banner.
    Recovered,
    MirrorUnavailable,
    MirrorRestored,
}

impl ConnectivityAlert {
    pub fn priority(&self) -> AlertPriority {
        match self {
            Self::CircuitOpen { .. } => AlertPriority::High,
            Self::Degraded { .. } | Self::MirrorUnavailable => AlertPriority::Normal,
            Self::Recovered | Self::MirrorRestored => AlertPriority::Info,
        }
    }
}

/// Maps a change in health to an alert, before throttling.
///
/// An open circuit alerts on every check; degradation and recovery only on
/// the transition.
pub fn classify(
    previous: Option<&ResilienceSnapshot>,
    current: &ResilienceSnapshot,
) -> Option<ConnectivityAlert> {
    let was_healthy = previous.is_none_or(|p| p.healthy);

    if current.state == CircuitState::Open {
        Some(ConnectivityAlert::CircuitOpen {
            consecutive_errors: current.consecutive_errors,
            retry_after: current.retry_after,
        })
    } else if !current.healthy {
        let newly_degraded =
            was_healthy || previous.is_some_and(|p| p.state != CircuitState::Closed);
        newly_degraded.then_some(ConnectivityAlert::Degraded {
            consecutive_errors: current.consecutive_errors,
            success_rate: current.success_rate,
        })
    } else if !was_healthy {
        Some(ConnectivityAlert::Recovered)
    } else {
        None
    }
}

pub struct ConnectivityMonitor {
    monitor: Arc<ResilienceMonitor>,
    mirror: Arc<dyn MirrorStore>,
    throttle: AlertThrottle,
    interval: Duration,
}

/// Handle to a running [`ConnectivityMonitor`].
pub struct ConnectivityHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ConnectivityHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

impl ConnectivityMonitor {
    pub fn new(
        monitor: Arc<ResilienceMonitor>,
        mirror: Arc<dyn MirrorStore>,
        interval: Duration,
        alert_cooldown: Duration,
    ) -> Self {
        Self {
            monitor,
            mirror,
            throttle: AlertThrottle::new(alert_cooldown),
            interval,
        }
    }

    /// Classifies and throttles one snapshot.
    fn check(
        &self,
        previous: Option<&ResilienceSnapshot>,
        current: &ResilienceSnapshot,
    ) -> Option<ConnectivityAlert> {
        let alert = classify(previous, current)?;
        if matches!(alert, ConnectivityAlert::CircuitOpen { .. }) && !self.throttle.try_fire() {
            debug!("Circuit-open alert suppressed by throttle");
            return None;
        }
        if alert == ConnectivityAlert::Recovered {
            self.throttle.reset();
        }
        Some(alert)
    }

    /// Runs on a fixed interval until `cancel` fires or the receiver is dropped.
    pub fn spawn(
        self,
        alerts: mpsc::Sender<ConnectivityAlert>,
        cancel: CancellationToken,
    ) -> ConnectivityHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(alerts, token).await });
        ConnectivityHandle { cancel, task }
    }

    async fn run(self, alerts: mpsc::Sender<ConnectivityAlert>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut previous: Option<ResilienceSnapshot> = None;
        let mut mirror_up = true;

        info!("Connectivity monitor started, checking every {:?}", self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.monitor.snapshot();
            let mut pending = Vec::new();
            if let Some(alert) = self.check(previous.as_ref(), &snapshot) {
                pending.push(alert);
            }

            let available = tokio::select! {
                () = cancel.cancelled() => break,
                available = self.mirror.test_connection() => available,
            };
            if available != mirror_up {
                mirror_up = available;
                pending.push(if available {
                    ConnectivityAlert::MirrorRestored
                } else {
                    ConnectivityAlert::MirrorUnavailable
                });
            }

            for alert in pending {
                if alerts.send(alert).await.is_err() {
                    info!("Alert receiver dropped, stopping connectivity monitor");
                    return;
                }
            }
            previous = Some(snapshot);
        }
        info!("Connectivity monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;
    use crate::models::MirrorRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ToggleMirror(AtomicBool);

    #[async_trait]
    impl MirrorStore for ToggleMirror {
        async fn list_all(&self) -> Result<Vec<MirrorRecord>, MirrorError> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _record: &MirrorRecord) -> Result<(), MirrorError> {
            Ok(())
        }

        async fn count_all(&self) -> Result<i64, MirrorError> {
            Ok(0)
        }

        async fn test_connection(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn snapshot(state: CircuitState, consecutive_errors: u32) -> ResilienceSnapshot {
        ResilienceSnapshot {
            consecutive_errors,
            total_requests: 10,
            total_failures: u64::from(consecutive_errors),
            success_rate: 80.0,
            healthy: state == CircuitState::Closed && consecutive_errors == 0,
            state,
            retry_after: None,
        }
    }

    #[test]
    fn classify_reports_transitions_only() {
        let healthy = snapshot(CircuitState::Closed, 0);
        let degraded = snapshot(CircuitState::Closed, 2);

        assert_eq!(classify(None, &healthy), None);
        assert!(matches!(
            classify(Some(&healthy), &degraded),
            Some(ConnectivityAlert::Degraded { consecutive_errors: 2, .. })
        ));
        assert_eq!(classify(Some(&degraded), &degraded), None);
        assert_eq!(
            classify(Some(&degraded), &healthy),
            Some(ConnectivityAlert::Recovered)
        );
        assert_eq!(
            classify(Some(&degraded), &snapshot(CircuitState::Open, 5)).map(|a| a.priority()),
            Some(AlertPriority::High)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_alerts_are_rate_limited() {
        let monitor = Arc::new(ResilienceMonitor::default());
        for _ in 0..monitor.policy().failure_threshold {
            monitor.record_failure();
        }
        let mirror = Arc::new(ToggleMirror(AtomicBool::new(true)));
        let checker = ConnectivityMonitor::new(
            Arc::clone(&monitor),
            mirror,
            Duration::from_secs(30),
            Duration::from_secs(120),
        );

        let open = monitor.snapshot();
        assert!(checker.check(None, &open).is_some());
        assert!(checker.check(Some(&open), &open).is_none());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(checker.check(Some(&open), &open).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_repeats_open_circuit_alert_once_per_cooldown() {
        let monitor = Arc::new(ResilienceMonitor::default());
        for _ in 0..monitor.policy().failure_threshold {
            monitor.record_failure();
        }
        let checker = ConnectivityMonitor::new(
            monitor,
            Arc::new(ToggleMirror(AtomicBool::new(true))),
            Duration::from_secs(30),
            Duration::from_secs(120),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let handle = checker.spawn(tx, CancellationToken::new());
        let started = tokio::time::Instant::now();

        assert!(matches!(
            rx.recv().await,
            Some(ConnectivityAlert::CircuitOpen { consecutive_errors: 5, .. })
        ));
        // Ticks at 30s, 60s and 90s are suppressed
        assert!(matches!(
            rx.recv().await,
            Some(ConnectivityAlert::CircuitOpen { .. })
        ));
        assert!(started.elapsed() >= Duration::from_secs(120));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_reports_mirror_changes_and_stops_on_cancel() {
        let monitor = Arc::new(ResilienceMonitor::default());
        let mirror = Arc::new(ToggleMirror(AtomicBool::new(false)));
        let checker = ConnectivityMonitor::new(
            monitor,
            Arc::clone(&mirror) as Arc<dyn MirrorStore>,
            Duration::from_secs(30),
            Duration::from_secs(120),
        );

        let (tx, mut rx) = mpsc::channel(8);
        let handle = checker.spawn(tx, CancellationToken::new());

        assert_eq!(rx.recv().await, Some(ConnectivityAlert::MirrorUnavailable));
        mirror.0.store(true, Ordering::SeqCst);
        assert_eq!(rx.recv().await, Some(ConnectivityAlert::MirrorRestored));

        handle.shutdown().await;
        assert_eq!(rx.recv().await, None);
    }
}
