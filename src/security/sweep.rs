//! Periodic sweep of threat history and CSRF sessions
//!
//! Both stores grow with every new source or session id. The host process
//! runs [`SecuritySweepService`] next to the rate-limit cleanup so that
//! neither grows without bound.

use crate::security::csrf::CsrfSessions;
use crate::security::guard::SecurityGuard;
use crate::security::threat_detection::ThreatDetector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What one sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub history_entries: usize,
    pub csrf_sessions: usize,
}

pub struct SecuritySweepService {
    detector: Arc<ThreatDetector>,
    csrf: Arc<CsrfSessions>,
    history_max_age: Duration,
    stop_signal: mpsc::Receiver<()>,
    sweep_interval: Duration,
}

impl SecuritySweepService {
    /// History older than the detector's longest look-back window is dropped
    pub fn new(
        guard: &SecurityGuard,
        stop_signal: mpsc::Receiver<()>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            detector: guard.detector().clone(),
            csrf: guard.csrf().clone(),
            history_max_age: guard.detector().longest_window(),
            stop_signal,
            sweep_interval,
        }
    }

    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            history_entries: self.detector.clear_threat_history(self.history_max_age),
            csrf_sessions: self.csrf.sweep_expired(),
        };

        if report.csrf_sessions > 0 {
            tracing::debug!("🧹 Dropped {} expired CSRF sessions", report.csrf_sessions);
        }

        report
    }

    /// Run until the stop signal fires or its sender is dropped
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.sweep_interval);

        tracing::info!(
            "🧹 Security sweep service started (interval: {:?}, history max age: {:?})",
            self.sweep_interval,
            self.history_max_age
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep();
                }
                _ = self.stop_signal.recv() => {
                    tracing::info!("🛑 Security sweep service stopping");
                    break;
                }
            }
        }

        tracing::info!("✅ Security sweep service stopped");
    }
}
