// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Background service that keeps the published duty in line with the fan
//! curve while the shared state says `auto`.
//!
//! One thread per service. Each tick reloads the control-state document;
//! in any mode other than auto the tick does nothing, so operator choices
//! are never overwritten. The loop sleeps in short slices and checks its
//! stop flag between them, which keeps `stop()` prompt.

use crate::config::DaemonConfig;
use crate::mode::{DEFAULT_MANUAL_DUTY, ModeResolver};
use crate::sensor::TemperatureSource;
use crate::state::ControlMode;
use crate::store::{DefaultReason, Defaulted};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lower bound for [`AutoControlService::set_poll_interval`].
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive sensor failures after which the published duty is reported stale.
pub const STALE_AFTER_FAILURES: u32 = 5;

const THREAD_NAME: &str = "fan-auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Running,
    /// `stop()` timed out and the loop thread has not exited yet.
    Stopping,
}

/// Snapshot returned by [`AutoControlService::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub poll_interval: Duration,
    pub thread_alive: bool,
}

/// Loop timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTiming {
    pub poll_interval: Duration,
    pub sleep_slice: Duration,
    pub stop_timeout: Duration,
}

impl Default for ServiceTiming {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

impl From<&DaemonConfig> for ServiceTiming {
    fn from(cfg: &DaemonConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            sleep_slice: cfg.sleep_slice(),
            stop_timeout: cfg.stop_timeout(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not in auto mode; storage untouched.
    Idle(ControlMode),
    /// Auto mode and the published duty already matched.
    Unchanged(u8),
    /// Auto mode and a new duty was written.
    Published(u8),
    /// Something failed; nothing was written.
    Skipped,
}

struct Shared {
    resolver: ModeResolver,
    source: Box<dyn TemperatureSource>,
    poll_interval_ms: AtomicU64,
    announced_idle: AtomicBool,
    sensor_failures: AtomicU32,
}

struct Worker {
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// The auto-mode control loop.
///
/// Construct one per process and share it (e.g. behind an `Arc`); `start`
/// and `stop` take `&self`.
pub struct AutoControlService {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    sleep_slice: Duration,
    stop_timeout: Duration,
}

impl AutoControlService {
    pub fn new(
        resolver: ModeResolver,
        source: Box<dyn TemperatureSource>,
        timing: ServiceTiming,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                resolver,
                source,
                poll_interval_ms: AtomicU64::new(duration_ms(timing.poll_interval)),
                announced_idle: AtomicBool::new(false),
                sensor_failures: AtomicU32::new(0),
            }),
            worker: Mutex::new(None),
            sleep_slice: timing.sleep_slice.max(Duration::from_millis(1)),
            stop_timeout: timing.stop_timeout,
        }
    }

    /// Spawn the loop thread. A no-op if it is already running; refused
    /// while a previous thread is still finishing after a timed-out stop.
    pub fn start(&self) -> io::Result<()> {
        let mut worker = self.worker.lock().map_err(|_| poisoned())?;
        match worker.as_ref().map(Worker::state) {
            Some(ServiceState::Running) => {
                log::info!("Auto control service already running");
                return Ok(());
            }
            Some(ServiceState::Stopping) => {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "previous auto control thread is still exiting",
                ));
            }
            Some(ServiceState::Stopped) => {
                if let Some(finished) = worker.take() {
                    finished.join()?;
                }
            }
            None => {}
        }

        self.shared.announced_idle.store(false, Ordering::SeqCst);
        self.shared.sensor_failures.store(0, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let stop_flag = Arc::clone(&stop);
        let slice = self.sleep_slice;

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                shared.run(&stop_flag, slice);
                let _ = done_tx.send(());
            })?;

        *worker = Some(Worker {
            stop,
            done: done_rx,
            handle,
        });
        log::info!(
            "Auto control service started (poll interval {}ms, source: {})",
            self.shared.poll_interval_ms.load(Ordering::SeqCst),
            self.shared.source.describe()
        );
        Ok(())
    }

    /// Signal the loop to exit and wait up to the stop timeout for it.
    /// A no-op if it is not running. On timeout the thread is kept on
    /// record as [`ServiceState::Stopping`] and a later `stop()` waits again.
    pub fn stop(&self) -> io::Result<()> {
        let mut guard = self.worker.lock().map_err(|_| poisoned())?;
        let Some(worker) = guard.as_ref() else {
            log::warn!("Auto control service is not running");
            return Ok(());
        };

        worker.stop.store(true, Ordering::SeqCst);
        match worker.done.recv_timeout(self.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(finished) = guard.take() {
                    finished.join()?;
                }
                log::info!("Auto control service stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Auto control thread did not exit within {}ms, still waiting on it",
                    self.stop_timeout.as_millis()
                );
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ServiceState {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        worker.as_ref().map_or(ServiceState::Stopped, Worker::state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub fn status(&self) -> ServiceStatus {
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        ServiceStatus {
            state: worker.as_ref().map_or(ServiceState::Stopped, Worker::state),
            poll_interval: self.poll_interval(),
            thread_alive: worker.as_ref().is_some_and(|w| !w.handle.is_finished()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.shared.poll_interval_ms.load(Ordering::SeqCst))
    }

    /// Change the loop period; values below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn set_poll_interval(&self, interval: Duration) {
        let interval = interval.max(MIN_POLL_INTERVAL);
        self.shared
            .poll_interval_ms
            .store(duration_ms(interval), Ordering::SeqCst);
        log::info!("Auto control poll interval set to {}ms", interval.as_millis());
    }

    /// Run one iteration on the calling thread.
    pub fn tick(&self) -> TickOutcome {
        self.shared.guarded_tick()
    }
}

impl Drop for AutoControlService {
    fn drop(&mut self) {
        if self.state() != ServiceState::Stopped {
            if let Err(e) = self.stop() {
                log::error!("Failed to stop auto control service: {e}");
            }
        }
    }
}

impl Worker {
    fn state(&self) -> ServiceState {
        if !self.stop.load(Ordering::SeqCst) {
            ServiceState::Running
        } else if self.handle.is_finished() {
            ServiceState::Stopped
        } else {
            ServiceState::Stopping
        }
    }

    fn join(self) -> io::Result<()> {
        self.handle
            .join()
            .map_err(|_| io::Error::other("auto control thread panicked"))
    }
}

impl Shared {
    fn run(&self, stop: &AtomicBool, slice: Duration) {
        while !stop.load(Ordering::SeqCst) {
            self.guarded_tick();

            let deadline =
                Instant::now() + Duration::from_millis(self.poll_interval_ms.load(Ordering::SeqCst));
            while !stop.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep(slice.min(deadline - now));
            }
        }
    }

    fn guarded_tick(&self) -> TickOutcome {
        panic::catch_unwind(AssertUnwindSafe(|| self.tick())).unwrap_or_else(|_| {
            log::error!("Auto control tick panicked, skipping");
            TickOutcome::Skipped
        })
    }

    fn tick(&self) -> TickOutcome {
        let state = match self.resolver.state_sync().load() {
            Ok(state) => state,
            Err(Defaulted {
                reason: DefaultReason::Unreadable(e),
                ..
            }) => {
                log::error!("Error loading control state: {e}");
                return TickOutcome::Skipped;
            }
            Err(defaulted) => defaulted.into_value(),
        };

        if state.mode != ControlMode::Auto {
            if !self.announced_idle.swap(true, Ordering::SeqCst) {
                log::info!("Mode is {}, waiting for auto before adjusting the fan", state.mode);
            }
            return TickOutcome::Idle(state.mode);
        }

        let temp_c = match self.source.read_celsius() {
            Ok(t) => {
                let failures = self.sensor_failures.swap(0, Ordering::SeqCst);
                if failures >= STALE_AFTER_FAILURES {
                    log::info!("Temperature readings recovered after {failures} failures");
                }
                t
            }
            Err(e) => {
                let failures = self.sensor_failures.fetch_add(1, Ordering::SeqCst) + 1;
                log::error!("Error reading temperature from {}: {e}", self.source.describe());
                if failures == STALE_AFTER_FAILURES {
                    log::warn!(
                        "{failures} consecutive temperature failures, published duty {:?} is stale",
                        state.target_duty
                    );
                }
                return TickOutcome::Skipped;
            }
        };

        match self.resolver.update_state(
            ControlMode::Auto,
            temp_c,
            state.target_duty,
            DEFAULT_MANUAL_DUTY,
        ) {
            Ok(new_state) => match new_state.target_duty {
                Some(duty) if new_state.target_duty != state.target_duty => {
                    TickOutcome::Published(duty)
                }
                Some(duty) => TickOutcome::Unchanged(duty),
                None => TickOutcome::Skipped,
            },
            Err(e) => {
                log::error!("Error saving computed duty: {e}");
                TickOutcome::Skipped
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn poisoned() -> io::Error {
    io::Error::other("auto control service bookkeeping lock poisoned")
}
