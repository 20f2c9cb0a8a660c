//! Hardware Abstraction Layer
//!
//! Capability traits for the two devices the survey drives, the shared
//! acquisition [`Pipeline`], and mock implementations for tests and offline
//! runs.
//!
//! # Module Structure
//!
//! - `capabilities` - [`Mount`] and [`Spectrometer`] traits
//! - `pipeline` - start/stop, session refcount and visualization taps
//! - `mock` - simulated devices with call counters

pub mod capabilities;
pub mod mock;
pub mod pipeline;

use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub use capabilities::{channel_frequencies, Mount, MountStatus, Spectrometer};
pub use pipeline::{Pipeline, SessionId, Spectrum};

use crate::coords::CoordinateTransform;

/// Stow position as (azimuth, elevation) in degrees.
pub const PARK_POSITION: (f64, f64) = (250.0, 50.0);

/// Everything a unit of work needs to touch the instrument.
///
/// Built once by the caller and handed to the scheduler or a survey; there is
/// no process-wide hardware handle.
#[derive(Clone)]
pub struct Station {
    pub mount: Arc<dyn Mount>,
    pub pipeline: Arc<Pipeline>,
    pub sky: Arc<dyn CoordinateTransform>,
}

impl Station {
    pub fn new(
        mount: Arc<dyn Mount>,
        pipeline: Arc<Pipeline>,
        sky: Arc<dyn CoordinateTransform>,
    ) -> Self {
        Self {
            mount,
            pipeline,
            sky,
        }
    }

    pub fn spectrometer(&self) -> &Arc<dyn Spectrometer> {
        self.pipeline.spectrometer()
    }
}

/// Poll the mount until it reports no motion, for controllers whose `point`
/// returns before the slew ends.
pub async fn wait_until_stopped(mount: &dyn Mount, poll: Duration, timeout: Duration) -> Result<()> {
    let started = tokio::time::Instant::now();
    loop {
        let status = mount.status().await?;
        if !status.moving {
            return Ok(());
        }
        if started.elapsed() >= timeout {
            bail!("mount still moving after {:?}", timeout);
        }
        debug!(position = %mount.position().await?, "Still moving");
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockMount;
    use super::*;

    #[tokio::test]
    async fn wait_returns_once_slew_completes() {
        let mount = Arc::new(MockMount::with_speed(200.0));
        let slewing = {
            let mount = mount.clone();
            tokio::spawn(async move { mount.point(0.0, 10.0).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        wait_until_stopped(mount.as_ref(), Duration::from_millis(20), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!mount.status().await.unwrap().moving);
        slewing.await.unwrap().unwrap();
    }
}
