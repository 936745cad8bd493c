//! In-process cycle scheduler.
//!
//! Each job runs on its own interval loop. A tick awaits the cycle inline, so
//! two ticks of the same loop never overlap; ticks missed while a cycle runs
//! are skipped rather than bunched up.

use crate::services::{DailySnapshotService, RiskMonitor, StrategyEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Loop cadences.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub risk_interval: Duration,
    pub strategy_interval: Duration,
    pub snapshot_interval: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            risk_interval: Duration::from_secs(300),
            strategy_interval: Duration::from_secs(300),
            snapshot_interval: Duration::from_secs(86_400),
        }
    }
}

pub struct Scheduler {
    risk: Arc<RiskMonitor>,
    strategies: Arc<StrategyEngine>,
    snapshots: Arc<DailySnapshotService>,
    settings: ScheduleSettings,
    shutdown_tx: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        risk: Arc<RiskMonitor>,
        strategies: Arc<StrategyEngine>,
        snapshots: Arc<DailySnapshotService>,
        settings: ScheduleSettings,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            risk,
            strategies,
            snapshots,
            settings,
            shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the three loops. Calling it again while running is a no-op.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        info!(
            "Scheduler started: risk every {}s, strategies every {}s, snapshots every {}s",
            self.settings.risk_interval.as_secs(),
            self.settings.strategy_interval.as_secs(),
            self.settings.snapshot_interval.as_secs()
        );

        let risk = self.risk.clone();
        let strategies = self.strategies.clone();
        let snapshots = self.snapshots.clone();
        vec![
            self.spawn_loop("risk", self.settings.risk_interval, move || {
                let risk = risk.clone();
                async move {
                    risk.run_cycle().await;
                }
            }),
            self.spawn_loop("strategies", self.settings.strategy_interval, move || {
                let strategies = strategies.clone();
                async move {
                    strategies.run_cycle().await;
                }
            }),
            self.spawn_loop("daily-snapshot", self.settings.snapshot_interval, move || {
                let snapshots = snapshots.clone();
                async move {
                    snapshots.run_cycle().await;
                }
            }),
        ]
    }

    /// Signal every loop to stop after its current cycle.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());
        info!("Scheduler stopped");
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(period.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Scheduler tick: {}", name);
                        job().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Scheduler loop {} received shutdown signal", name);
                        break;
                    }
                }
            }
        })
    }
}
