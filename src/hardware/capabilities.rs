//! Hardware Capabilities
//!
//! The survey system touches exactly two devices, each behind a small
//! capability trait:
//!
//! - [`Mount`]: the alt-azimuth positioner carrying the dish
//! - [`Spectrometer`]: the receiver front end producing integrated power spectra
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for state
//!
//! Callers never hold these directly from UI threads. Everything that touches
//! hardware goes through the action scheduler's worker.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::coords::HorizontalPosition;

/// Motion flags reported by the mount controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MountStatus {
    /// Either axis is still slewing
    pub moving: bool,
    /// Last commanded position, if the controller is in position mode
    pub commanded: Option<HorizontalPosition>,
}

/// Capability: Alt-Azimuth Pointing
///
/// # Contract
/// - Angles are degrees; azimuth east of north, elevation above horizontal
/// - `point` may return before the slew completes; callers that need the dish
///   stationary either wait on [`Mount::status`] or allow a settle time
/// - `position` is read back from the encoders and can differ from the command
#[async_trait]
pub trait Mount: Send + Sync {
    /// Command both axes to a position.
    async fn point(&self, azimuth: f64, elevation: f64) -> Result<()>;

    /// Encoder read-back.
    async fn position(&self) -> Result<HorizontalPosition>;

    /// Motion flags.
    async fn status(&self) -> Result<MountStatus>;
}

/// Capability: Integrated Power Spectra
///
/// # Contract
/// - `start`/`stop` control the streaming front end and are idempotent
/// - `observe` integrates for the requested duration and returns one power
///   value per channel; it is not interruptible
/// - Frequencies are in Hz, gain in dB
#[async_trait]
pub trait Spectrometer: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Integrate for `integration` and return the averaged spectrum.
    async fn observe(&self, integration: Duration) -> Result<Vec<f64>>;

    async fn set_gain(&self, gain_db: f64) -> Result<()>;

    fn gain(&self) -> f64;

    async fn set_center_frequency(&self, hz: f64) -> Result<()>;

    fn center_frequency(&self) -> f64;

    async fn set_bandwidth(&self, hz: f64) -> Result<()>;

    fn bandwidth(&self) -> f64;

    fn channel_count(&self) -> usize;

    /// Center frequency of each channel, evenly spread across the bandwidth.
    fn channel_frequencies(&self) -> Vec<f64> {
        channel_frequencies(
            self.center_frequency(),
            self.bandwidth(),
            self.channel_count(),
        )
    }
}

/// `count` frequencies spanning `center ± bandwidth/2`, endpoints included.
pub fn channel_frequencies(center: f64, bandwidth: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![center],
        n => {
            let low = center - bandwidth / 2.0;
            let step = bandwidth / (n - 1) as f64;
            (0..n).map(|i| low + step * i as f64).collect()
        }
    }
}
