//! # Tank Level Core Library
//!
//! This library turns a stream of raw ultrasonic distance readings into a
//! tank fill level and republishes it as an NMEA0183 `XDR` sentence over a
//! UDP broadcast and an MQTT broker. It is built for small always-on Linux
//! boards (Raspberry Pi class) mounted next to the tank.
//!
//! ## Design Philosophy
//!
//! ### One driver, no hidden threads
//! Every core component exposes a non-blocking `tick()`-style entry point and
//! is owned by a single [`station::Station`]. The driver calls them in a
//! fixed order once per cycle (~50 ms):
//!
//! 1. **Sample**: ask the sensor for a [`RawSample`] (only every sampling interval)
//! 2. **Smooth**: feed it through the moving average in [`pipeline::LevelPipeline`]
//! 3. **Publish**: encode a sentence with [`nmea`] and hand it to the transports
//! 4. **Supervise**: advance the network and broker [`supervisor`] state machines
//!
//! Sensor ingestion therefore always happens before publish decisions, and
//! publish decisions always happen before connectivity changes on the same tick.
//!
//! ### Degrade, don't crash
//! - **Sensor missing**: the reading stops refreshing and `sensor_ok` drops
//! - **Network down**: nothing is transmitted; supervisors retry with backoff
//! - **Network unrecoverable**: the radio is switched off and the process asks
//!   its host to restart it
//!
//! ## Core Types
//!
//! - [`RawSample`]: one reading straight from the sensor with its status
//! - [`LevelReading`]: the smoothed height, fill percentage and sensor health

use serde::{Deserialize, Serialize};

// Module declarations
pub mod config;
pub mod display;
pub mod filter;
pub mod nmea;
pub mod pipeline;
pub mod publisher;
pub mod sensor;
pub mod simulator;
pub mod station;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod tests;

/// Outcome of one sensor read.
///
/// Both `Valid` and `ChecksumFail` mean the sensor is present and talking;
/// only `NoSensor` says anything about availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    /// Nothing received from the sensor within its frame window
    NoSensor,
    /// Frame received and checksum matched
    Valid,
    /// Frame received but checksum did not match; the value is still carried
    ChecksumFail,
}

impl SensorStatus {
    /// True for statuses that carry a usable distance value.
    pub fn is_present(self) -> bool {
        matches!(self, SensorStatus::Valid | SensorStatus::ChecksumFail)
    }
}

/// A single sensor reading, only kept for the tick it arrived on.
///
/// # Example
/// ```
/// use tank_level_lib::{RawSample, SensorStatus};
///
/// let sample = RawSample { value_mm: 212, status: SensorStatus::Valid };
/// assert!(sample.status.is_present());
///
/// let missing = RawSample::missing();
/// assert_eq!(missing.status, SensorStatus::NoSensor);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    /// Measured liquid height in millimetres
    pub value_mm: u32,
    /// Quality/availability of this reading
    pub status: SensorStatus,
}

impl RawSample {
    /// A reading that reports the sensor as absent.
    pub fn missing() -> Self {
        RawSample {
            value_mm: 0,
            status: SensorStatus::NoSensor,
        }
    }
}

/// Current output of the level pipeline.
///
/// `fill_percent` is always within `0..=100`.
///
/// # Example
/// ```
/// use tank_level_lib::LevelReading;
///
/// let reading = LevelReading { filtered_height_mm: 100, fill_percent: 25, sensor_ok: true };
/// assert_eq!(reading.fill_text(), "25");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelReading {
    /// Moving-average height in millimetres
    pub filtered_height_mm: u32,
    /// Fill level of the tank in percent
    pub fill_percent: u8,
    /// Whether the sensor is considered present
    pub sensor_ok: bool,
}

impl LevelReading {
    /// Fill percentage as the decimal text carried in the NMEA sentence.
    pub fn fill_text(&self) -> String {
        self.fill_percent.to_string()
    }
}
