use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use arrival_store::ArrivalController;
use engine_api::{Engine, EngineError, EngineHealth, EngineResult, HealthStatus};
use log::{debug, error, info};
use metrics::Metrics;

const DEFAULT_SWEEP_INTERVAL_MS: u64 = 10_000;

/// Background eviction sweeper. Each pass reclaims expired dedup
/// entries through the controller's bounded sweep; the cap keeps one
/// pass from monopolizing the store lock on a pathologically large
/// table, with the remainder picked up next pass.
pub struct SweepEngine {
    inner: Arc<SweepInner>,
}

#[derive(Clone)]
pub struct SweepEngineConfig {
    pub label: String,
    pub interval: Duration,
}

impl Default for SweepEngineConfig {
    fn default() -> Self {
        Self {
            label: "dev".to_string(),
            interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
        }
    }
}

impl SweepEngine {
    pub fn new(
        config: SweepEngineConfig,
        controller: Arc<ArrivalController>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: SweepInner::new(config, controller, metrics),
        }
    }
}

impl Engine for SweepEngine {
    fn start(&self) -> EngineResult<()> {
        SweepInner::start(&self.inner)
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> EngineHealth {
        self.inner.health()
    }
}

struct SweepInner {
    config: SweepEngineConfig,
    controller: Arc<ArrivalController>,
    metrics: Arc<Metrics>,
    state: Mutex<EngineRuntimeState>,
    health: Mutex<EngineHealth>,
}

impl SweepInner {
    fn new(
        config: SweepEngineConfig,
        controller: Arc<ArrivalController>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            controller,
            metrics,
            state: Mutex::new(EngineRuntimeState::Stopped),
            health: Mutex::new(EngineHealth::new(HealthStatus::Stopped, None)),
        })
    }

    fn start(this: &Arc<Self>) -> EngineResult<()> {
        let mut guard = this.state.lock().unwrap();
        if matches!(*guard, EngineRuntimeState::Running(_)) {
            return Err(EngineError::AlreadyRunning);
        }
        this.set_health(HealthStatus::Starting, None);
        let cancel = Arc::new(AtomicBool::new(false));
        let runner = Arc::clone(this);
        let cancel_clone = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name(format!("{}-sweep", this.config.label))
            .spawn(move || runner.run(cancel_clone))
            .map_err(|err| EngineError::Failure {
                source: Box::new(err),
            })?;
        info!(
            "[{}] sweep engine starting (interval {:?})",
            this.config.label, this.config.interval
        );
        *guard = EngineRuntimeState::Running(ThreadBundle { cancel, handle });
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut guard = self.state.lock().unwrap();
        let Some(bundle) = guard.take_running() else {
            return Err(EngineError::NotRunning);
        };
        bundle.cancel.store(true, Ordering::Relaxed);
        if let Err(err) = bundle.handle.join() {
            error!("[{}] sweep join error: {:?}", self.config.label, err);
        }
        *guard = EngineRuntimeState::Stopped;
        self.set_health(HealthStatus::Stopped, None);
        Ok(())
    }

    fn health(&self) -> EngineHealth {
        self.health.lock().unwrap().clone()
    }

    fn run(self: Arc<Self>, cancel: Arc<AtomicBool>) {
        self.set_health(HealthStatus::Ready, None);
        while !cancel.load(Ordering::Relaxed) {
            let removed = self.controller.sweep_expired();
            if removed > 0 {
                self.metrics.add_evictions(removed as u64);
                debug!(
                    "[{}] swept {} expired entries ({} live)",
                    self.config.label,
                    removed,
                    self.controller.live_entries()
                );
            }
            sleep_with_cancel(&cancel, self.config.interval);
        }
        self.set_health(HealthStatus::Stopped, None);
        info!("[{}] sweep engine stopped", self.config.label);
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock().unwrap();
        guard.status = status;
        guard.detail = detail;
    }
}

fn sleep_with_cancel(cancel: &AtomicBool, interval: Duration) {
    const STEP: Duration = Duration::from_millis(50);
    let mut remaining = interval;
    while remaining > Duration::ZERO {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let sleep_for = if remaining > STEP { STEP } else { remaining };
        thread::sleep(sleep_for);
        remaining = remaining.saturating_sub(sleep_for);
    }
}

enum EngineRuntimeState {
    Stopped,
    Running(ThreadBundle),
}

impl EngineRuntimeState {
    fn take_running(&mut self) -> Option<ThreadBundle> {
        match std::mem::replace(self, EngineRuntimeState::Stopped) {
            EngineRuntimeState::Running(bundle) => Some(bundle),
            other => {
                *self = other;
                None
            }
        }
    }
}

struct ThreadBundle {
    cancel: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}
