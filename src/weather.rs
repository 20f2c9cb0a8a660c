//! Weather feed ingestion.
//!
//! The station feed delivers readings asynchronously; [`spawn_listener`]
//! drains them into the shared [`RefractionEnvironment`] so subsequent
//! coordinate transforms pick up the new refraction correction.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coords::{RefractionEnvironment, WeatherReading};

impl WeatherReading {
    /// Readings outside physical bounds come from garbled packets.
    pub fn is_plausible(&self) -> bool {
        (-60.0..=60.0).contains(&self.temperature_c)
            && (0.0..=1.0).contains(&self.relative_humidity)
            && (800.0..=1100.0).contains(&self.pressure_mbar)
    }

    /// Build a reading from a report in Fahrenheit with humidity in percent.
    pub fn from_imperial(temperature_f: f64, humidity_percent: f64, pressure_mbar: f64) -> Self {
        Self {
            temperature_c: (temperature_f - 32.0) * 5.0 / 9.0,
            relative_humidity: humidity_percent / 100.0,
            pressure_mbar,
        }
    }
}

/// Sender half handed to the weather feed.
pub type WeatherSender = mpsc::Sender<WeatherReading>;

/// Spawn a task applying every plausible reading to `environment`.
///
/// The task ends when all senders are dropped.
pub fn spawn_listener(environment: RefractionEnvironment) -> (WeatherSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WeatherReading>(16);
    let handle = tokio::spawn(async move {
        while let Some(reading) = rx.recv().await {
            if !reading.is_plausible() {
                warn!(?reading, "Ignoring implausible weather reading");
                continue;
            }
            debug!(?reading, "Received weather reading");
            environment.update(reading);
        }
        debug!("Weather feed closed");
    });
    (tx, handle)
}
