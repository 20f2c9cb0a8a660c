//! The shared acquisition pipeline.
//!
//! One [`Pipeline`] wraps the spectrometer for the whole process. The
//! scheduler starts it before running work and releases it when idle; operator
//! sessions attach to it to watch live spectra. Start, stop and the session
//! count live under the pipeline's own lock, separate from the scheduler lock,
//! so a session attaching while the scheduler goes idle cannot see the
//! pipeline stopped underneath it.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::Spectrometer;

/// One integrated spectrum, as broadcast to visualization taps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub timestamp: DateTime<Utc>,
    /// Hz
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

/// Handle for an attached operator session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

#[derive(Debug, Default)]
struct PipelineState {
    running: bool,
    sessions: HashSet<SessionId>,
}

pub struct Pipeline {
    spectrometer: Arc<dyn Spectrometer>,
    state: Mutex<PipelineState>,
    taps: broadcast::Sender<Arc<Spectrum>>,
    next_session: AtomicU64,
}

impl Pipeline {
    pub fn new(spectrometer: Arc<dyn Spectrometer>) -> Self {
        let (taps, _) = broadcast::channel(16);
        Self {
            spectrometer,
            state: Mutex::new(PipelineState::default()),
            taps,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn spectrometer(&self) -> &Arc<dyn Spectrometer> {
        &self.spectrometer
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Start streaming if not already started. Idempotent.
    pub async fn ensure_started(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.running {
            self.spectrometer.start().await?;
            state.running = true;
            info!("Acquisition pipeline started");
        }
        Ok(())
    }

    /// Stop streaming unless a session still needs it.
    ///
    /// Returns `true` when the pipeline is stopped afterwards. Stopping an
    /// already stopped pipeline is a no-op.
    pub async fn release(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.sessions.is_empty() {
            debug!(
                sessions = state.sessions.len(),
                "Leaving pipeline running for attached sessions"
            );
            return Ok(false);
        }
        if state.running {
            self.spectrometer.stop().await?;
            state.running = false;
            info!("Acquisition pipeline stopped");
        }
        Ok(true)
    }

    /// Stop regardless of attached sessions. Used at shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.sessions.clear();
        if state.running {
            self.spectrometer.stop().await?;
            state.running = false;
            info!("Acquisition pipeline shut down");
        }
        Ok(())
    }

    /// Register an operator session and make sure data is flowing for it.
    pub async fn attach_session(&self) -> Result<SessionId> {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().await;
        state.sessions.insert(id);
        if !state.running {
            self.spectrometer.start().await?;
            state.running = true;
            info!("Acquisition pipeline started for session");
        }
        debug!(sessions = state.sessions.len(), "Session attached");
        Ok(id)
    }

    /// Forget a session. Returns `false` if it was not attached.
    ///
    /// This does not stop the pipeline; the scheduler's idle path does that.
    pub async fn detach_session(&self, id: SessionId) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.sessions.remove(&id);
        debug!(sessions = state.sessions.len(), removed, "Session detached");
        removed
    }

    /// Live spectra for a visualization tap.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Spectrum>> {
        self.taps.subscribe()
    }

    /// Integrate once and publish the result to all taps.
    pub async fn observe(&self, integration: Duration) -> Result<Vec<f64>> {
        let power = self.spectrometer.observe(integration).await?;
        if self.taps.receiver_count() > 0 {
            let spectrum = Spectrum {
                timestamp: Utc::now(),
                frequencies: self.spectrometer.channel_frequencies(),
                power: power.clone(),
            };
            // lagging taps just miss frames
            let _ = self.taps.send(Arc::new(spectrum));
        }
        Ok(power)
    }
}
