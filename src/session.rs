//! Bounded-duration scanning window.
//!
//! A [`ScanSession`] is `Idle` until [`ScanSession::start`] is called, then
//! accepts observations until its deadline elapses or it is stopped. The
//! registry is only mutated through [`ScanSession::submit`], under the
//! session lock, so snapshots never observe a half-applied merge.

use crate::observation::Observation;
use crate::registry::{AggregatedDevice, DeviceRegistry};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

/// Errors returned when a session cannot be started.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The deadline timer needs a Tokio runtime
    #[error("no Tokio runtime to run the scan deadline: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[derive(Debug, Default)]
struct Inner {
    registry: DeviceRegistry,
    started_at: Option<Instant>,
    deadline: Option<JoinHandle<()>>,
    /// Bumped on every start so a stale deadline cannot end a newer window
    generation: u64,
}

/// A cloneable handle to one scanning window and its device registry.
#[derive(Debug, Clone)]
pub struct ScanSession {
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<ScanState>>,
}

impl Default for ScanSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            state: Arc::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new scanning window lasting `timeout`.
    ///
    /// Any running window is stopped first and the registry is cleared.
    ///
    /// # Errors
    /// Returns [`SessionError::NoRuntime`] outside a Tokio runtime; the
    /// session is left untouched.
    pub fn start(&self, timeout: Duration) -> Result<(), SessionError> {
        let runtime = Handle::try_current()?;
        let mut inner = self.lock();

        if let Some(deadline) = inner.deadline.take() {
            deadline.abort();
        }
        if self.state() == ScanState::Scanning {
            log::info!("restarting scan session");
        }

        inner.registry.clear();
        inner.generation = inner.generation.wrapping_add(1);
        inner.started_at = Some(Instant::now());

        let generation = inner.generation;
        let session = self.clone();
        inner.deadline = Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            session.expire(generation);
        }));

        self.state.send_replace(ScanState::Scanning);
        log::info!("scan session started for {timeout:?}");
        Ok(())
    }

    fn expire(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || self.state() != ScanState::Scanning {
            return;
        }
        inner.deadline = None;
        self.state.send_replace(ScanState::Idle);
        log::info!(
            "scan window elapsed with {} device(s) seen",
            inner.registry.len()
        );
    }

    /// End the current window early. Does nothing when already idle.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if let Some(deadline) = inner.deadline.take() {
            deadline.abort();
        }
        if self.state() == ScanState::Scanning {
            self.state.send_replace(ScanState::Idle);
            log::info!("scan session stopped");
        }
    }

    /// Discard every aggregated device without changing the session state.
    pub fn clear(&self) {
        self.lock().registry.clear();
    }

    /// Merge an observation into the registry.
    ///
    /// Returns `false` and drops the observation when the session is idle.
    pub fn submit(&self, observation: Observation) -> bool {
        let mut inner = self.lock();
        if self.state() != ScanState::Scanning {
            return false;
        }
        let device = inner.registry.merge(observation);
        log::debug!(
            "{} rssi={} count={} interval={:?}",
            device.address,
            device.last_rssi,
            device.observation_count,
            device.advertising_interval()
        );
        true
    }

    /// A consistent copy of all devices, ascending by address.
    pub fn snapshot(&self) -> Vec<AggregatedDevice> {
        self.lock().registry.snapshot()
    }

    pub fn state(&self) -> ScanState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. to learn when the deadline elapsed.
    pub fn subscribe(&self) -> watch::Receiver<ScanState> {
        self.state.subscribe()
    }

    /// Time since the most recent `start`, if the session was ever started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.lock().started_at.map(|started| started.elapsed())
    }
}
