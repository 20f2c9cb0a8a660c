//! Mock Hardware Implementations
//!
//! Provides simulated devices for testing and for offline runs of the CLI.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockMount` - Simulated alt-az mount with slew timing and encoder read-back
//! - `MockSpectrometer` - Simulated receiver producing a hydrogen-line spectrum
//! - `ActivityProbe` - Shared counter proving no two hardware calls overlap
//!
//! # Performance Characteristics
//!
//! - MockMount: 10°/sec slew on the longer axis
//! - MockSpectrometer: sleeps `integration × time_scale` per observation

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::debug;

use super::{Mount, MountStatus, Spectrometer, PARK_POSITION};
use crate::coords::HorizontalPosition;

// =============================================================================
// ActivityProbe - Overlap Detection
// =============================================================================

/// Counts hardware calls in flight across every device sharing the probe.
#[derive(Debug, Default)]
pub struct ActivityProbe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

/// Decrements the probe's active count on drop.
pub struct ProbeGuard<'a>(&'a ActivityProbe);

impl ActivityProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        ProbeGuard(self)
    }

    /// Highest number of simultaneous calls ever observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

type ObserveHook = Box<dyn Fn(usize) + Send + Sync>;

// =============================================================================
// MockMount - Simulated Alt-Az Mount
// =============================================================================

/// Mock alt-az mount.
///
/// Slews both axes simultaneously at a fixed speed, so the slew time is set by
/// the longer of the two moves. `point` blocks for the slew.
///
/// # Example
///
/// ```rust,ignore
/// let mount = MockMount::new();
/// mount.point(90.0, 45.0).await?; // Takes ~4.5 seconds from park
/// assert_eq!(mount.position().await?.azimuth, 90.0);
/// ```
pub struct MockMount {
    position: RwLock<HorizontalPosition>,
    moving: AtomicBool,
    speed_deg_per_sec: f64,
    point_calls: AtomicUsize,
    commanded: RwLock<Vec<HorizontalPosition>>,
    fail_point_at: Option<usize>,
    probe: Option<Arc<ActivityProbe>>,
}

impl MockMount {
    /// Create new mock mount parked at [`PARK_POSITION`] with a 10°/sec slew.
    pub fn new() -> Self {
        Self::with_speed(10.0)
    }

    /// A mount that arrives instantly.
    pub fn instant() -> Self {
        Self::with_speed(f64::INFINITY)
    }

    pub fn with_speed(speed_deg_per_sec: f64) -> Self {
        Self {
            position: RwLock::new(HorizontalPosition::new(PARK_POSITION.0, PARK_POSITION.1)),
            moving: AtomicBool::new(false),
            speed_deg_per_sec,
            point_calls: AtomicUsize::new(0),
            commanded: RwLock::new(Vec::new()),
            fail_point_at: None,
            probe: None,
        }
    }

    /// Fail the `n`th call to `point` (1-based).
    pub fn fail_point_at(mut self, n: usize) -> Self {
        self.fail_point_at = Some(n);
        self
    }

    pub fn with_probe(mut self, probe: Arc<ActivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn point_count(&self) -> usize {
        self.point_calls.load(Ordering::SeqCst)
    }

    /// Every position passed to `point`, in order.
    pub fn commanded_positions(&self) -> Vec<HorizontalPosition> {
        self.commanded.read().clone()
    }
}

impl Default for MockMount {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mount for MockMount {
    async fn point(&self, azimuth: f64, elevation: f64) -> Result<()> {
        let _guard = self.probe.as_ref().map(|p| p.enter());
        let call = self.point_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_point_at == Some(call) {
            bail!("MockMount: drive fault on command #{call}");
        }

        let target = HorizontalPosition::new(azimuth, elevation);
        self.commanded.write().push(target);

        let current = *self.position.read();
        let distance = (target.azimuth - current.azimuth)
            .abs()
            .max((target.elevation - current.elevation).abs());
        let delay = if self.speed_deg_per_sec.is_finite() && self.speed_deg_per_sec > 0.0 {
            Duration::from_secs_f64(distance / self.speed_deg_per_sec)
        } else {
            Duration::ZERO
        };

        debug!("MockMount: Moving from {} to {} ({:?})", current, target, delay);
        self.moving.store(true, Ordering::SeqCst);
        sleep(delay).await;
        *self.position.write() = target;
        self.moving.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn position(&self) -> Result<HorizontalPosition> {
        Ok(*self.position.read())
    }

    async fn status(&self) -> Result<MountStatus> {
        Ok(MountStatus {
            moving: self.moving.load(Ordering::SeqCst),
            commanded: self.commanded.read().last().copied(),
        })
    }
}

// =============================================================================
// MockSpectrometer - Simulated Receiver
// =============================================================================

/// Mock spectrometer with a Gaussian hydrogen line on a flat noisy baseline.
///
/// Must be started before `observe`, like the real flowgraph.
pub struct MockSpectrometer {
    center_hz: RwLock<f64>,
    bandwidth_hz: RwLock<f64>,
    gain_db: RwLock<f64>,
    channels: usize,
    time_scale: f64,
    streaming: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    observe_calls: AtomicUsize,
    fail_observe_at: Option<usize>,
    observe_hook: Option<ObserveHook>,
    probe: Option<Arc<ActivityProbe>>,
}

impl MockSpectrometer {
    pub fn new(center_hz: f64, bandwidth_hz: f64, channels: usize) -> Self {
        Self {
            center_hz: RwLock::new(center_hz),
            bandwidth_hz: RwLock::new(bandwidth_hz),
            gain_db: RwLock::new(60.0),
            channels,
            time_scale: 0.0,
            streaming: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            observe_calls: AtomicUsize::new(0),
            fail_observe_at: None,
            observe_hook: None,
            probe: None,
        }
    }

    /// Scale applied to integration time when sleeping (1.0 = real time).
    pub fn with_time_scale(mut self, scale: f64) -> Self {
        self.time_scale = scale.max(0.0);
        self
    }

    /// Fail the `n`th call to `observe` (1-based).
    pub fn fail_observe_at(mut self, n: usize) -> Self {
        self.fail_observe_at = Some(n);
        self
    }

    /// Run `hook(count)` after each successful observation.
    pub fn with_observe_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.observe_hook = Some(Box::new(hook));
        self
    }

    pub fn with_probe(mut self, probe: Arc<ActivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn observe_count(&self) -> usize {
        self.observe_calls.load(Ordering::SeqCst)
    }

    fn synthesize(&self) -> Vec<f64> {
        let frequencies = self.channel_frequencies();
        let center = *self.center_hz.read();
        let width = (*self.bandwidth_hz.read() / 40.0).max(1.0);
        let gain = 10f64.powf(*self.gain_db.read() / 20.0) / 1000.0;
        let mut rng = rand::thread_rng();
        frequencies
            .iter()
            .map(|f| {
                let line = 0.5 * (-((f - center) / width).powi(2) / 2.0).exp();
                gain * (1.0 + line + rng.gen_range(-0.02..0.02))
            })
            .collect()
    }
}

#[async_trait]
impl Spectrometer for MockSpectrometer {
    async fn start(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.streaming.swap(true, Ordering::SeqCst) {
            debug!("MockSpectrometer: Already streaming");
        } else {
            debug!("MockSpectrometer: Stream started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
        debug!("MockSpectrometer: Stream stopped");
        Ok(())
    }

    async fn observe(&self, integration: Duration) -> Result<Vec<f64>> {
        let _guard = self.probe.as_ref().map(|p| p.enter());
        let call = self.observe_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.is_streaming() {
            bail!("MockSpectrometer: Cannot observe - not streaming");
        }
        if self.fail_observe_at == Some(call) {
            bail!("MockSpectrometer: integration #{call} timed out");
        }

        sleep(integration.mul_f64(self.time_scale)).await;
        let spectrum = self.synthesize();
        if let Some(hook) = &self.observe_hook {
            hook(call);
        }
        Ok(spectrum)
    }

    async fn set_gain(&self, gain_db: f64) -> Result<()> {
        *self.gain_db.write() = gain_db;
        Ok(())
    }

    fn gain(&self) -> f64 {
        *self.gain_db.read()
    }

    async fn set_center_frequency(&self, hz: f64) -> Result<()> {
        *self.center_hz.write() = hz;
        Ok(())
    }

    fn center_frequency(&self) -> f64 {
        *self.center_hz.read()
    }

    async fn set_bandwidth(&self, hz: f64) -> Result<()> {
        *self.bandwidth_hz.write() = hz;
        Ok(())
    }

    fn bandwidth(&self) -> f64 {
        *self.bandwidth_hz.read()
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_mount_point() {
        let mount = MockMount::instant();

        mount.point(90.0, 45.0).await.unwrap();
        let pos = mount.position().await.unwrap();
        assert_eq!(pos, HorizontalPosition::new(90.0, 45.0));
        assert_eq!(mount.point_count(), 1);

        let status = mount.status().await.unwrap();
        assert!(!status.moving);
        assert_eq!(status.commanded, Some(pos));
    }

    #[tokio::test]
    async fn test_mock_mount_reports_motion() {
        let mount = Arc::new(MockMount::with_speed(1000.0));
        let slewing = {
            let mount = mount.clone();
            tokio::spawn(async move { mount.point(0.0, 0.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mount.status().await.unwrap().moving);
        slewing.await.unwrap().unwrap();
        assert!(!mount.status().await.unwrap().moving);
    }

    #[tokio::test]
    async fn test_mock_mount_failure_injection() {
        let mount = MockMount::instant().fail_point_at(2);
        mount.point(10.0, 10.0).await.unwrap();
        assert!(mount.point(20.0, 20.0).await.is_err());
        mount.point(30.0, 30.0).await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_spectrometer_requires_streaming() {
        let spec = MockSpectrometer::new(1420.406e6, 2.4e6, 64);
        assert!(spec.observe(Duration::from_secs(1)).await.is_err());

        spec.start().await.unwrap();
        let power = spec.observe(Duration::from_secs(1)).await.unwrap();
        assert_eq!(power.len(), 64);
        // the line peaks near the center channel
        let peak = power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!((28..=36).contains(&peak), "peak at {peak}");
    }

    #[tokio::test]
    async fn test_mock_spectrometer_start_is_idempotent() {
        let spec = MockSpectrometer::new(1420.406e6, 2.4e6, 8);
        spec.start().await.unwrap();
        spec.start().await.unwrap();
        assert!(spec.is_streaming());
        spec.stop().await.unwrap();
        spec.stop().await.unwrap();
        assert!(!spec.is_streaming());
    }

    #[tokio::test]
    async fn test_probe_tracks_overlap() {
        let probe = ActivityProbe::new();
        {
            let _a = probe.enter();
            let _b = probe.enter();
        }
        let _c = probe.enter();
        assert_eq!(probe.max_active(), 2);
        assert_eq!(probe.calls(), 3);
    }
}
