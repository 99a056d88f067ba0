//! # Level Pipeline
//!
//! Owns the moving average and converts accepted raw samples into a
//! [`LevelReading`]. It also tracks whether the sensor is alive and raises a
//! one-shot "new data" flag for the publisher.
//!
//! ## Sensor health
//!
//! The ultrasonic sensor reports one of three statuses per read. A frame
//! with a bad checksum still proves the sensor is connected, so both
//! `Valid` and `ChecksumFail` count as present and both feed the filter.
//! This mixes data quality with liveness; [`LevelPipeline::last_status`]
//! keeps the raw status around for callers that want to tell them apart.
//!
//! `NoSensor` never touches the filter. Before the first present reading
//! the sensor is reported as not ok; afterwards it takes
//! `no_sensor_threshold` consecutive misses before `sensor_ok` drops.
//!
//! ## New-data flag
//!
//! [`LevelPipeline::consume_data_ready`] reads and clears the flag, so only
//! one consumer ever sees a given update. The pipeline is owned by the
//! single driver loop and must not be shared between readers.

use crate::filter::MovingAverage;
use crate::{LevelReading, RawSample, SensorStatus};
use log::{info, warn};

/// Smoothing and fill-level derivation for a single tank.
#[derive(Debug)]
pub struct LevelPipeline {
    filter: MovingAverage,
    tank_height_mm: u32,
    no_sensor_threshold: u32,
    reading: LevelReading,
    data_ready: bool,
    seen_present: bool,
    missing_streak: u32,
    last_status: Option<SensorStatus>,
}

impl LevelPipeline {
    /// Create a pipeline for a tank `tank_height_mm` tall.
    pub fn new(window_size: usize, tank_height_mm: u32, no_sensor_threshold: u32) -> Self {
        Self {
            filter: MovingAverage::new(window_size),
            tank_height_mm,
            no_sensor_threshold: no_sensor_threshold.max(1),
            reading: LevelReading::default(),
            data_ready: false,
            seen_present: false,
            missing_streak: 0,
            last_status: None,
        }
    }

    /// Ingest one raw sample.
    pub fn on_raw_sample(&mut self, sample: RawSample) {
        if self.last_status != Some(sample.status) {
            match sample.status {
                SensorStatus::NoSensor => warn!("No sensor detected; check the sensor wiring"),
                SensorStatus::Valid => info!("Sensor reading valid"),
                SensorStatus::ChecksumFail => {
                    warn!("Sensor frame checksum failed; using the value anyway")
                }
            }
        }
        self.last_status = Some(sample.status);

        if !sample.status.is_present() {
            self.missing_streak = self.missing_streak.saturating_add(1);
            if !self.seen_present || self.missing_streak >= self.no_sensor_threshold {
                self.reading.sensor_ok = false;
            }
            return;
        }

        self.missing_streak = 0;
        self.seen_present = true;

        let average = self.filter.insert(sample.value_mm);
        self.reading = LevelReading {
            filtered_height_mm: average,
            fill_percent: fill_percent(average, self.tank_height_mm),
            sensor_ok: true,
        };
        self.data_ready = true;
    }

    /// Return whether a sample was accepted since the last call, clearing the flag.
    pub fn consume_data_ready(&mut self) -> bool {
        std::mem::take(&mut self.data_ready)
    }

    /// Snapshot of the current reading.
    pub fn current_reading(&self) -> LevelReading {
        self.reading
    }

    /// Status of the most recent raw sample, if any arrived yet.
    pub fn last_status(&self) -> Option<SensorStatus> {
        self.last_status
    }

    /// Consecutive `NoSensor` samples seen since the last present one.
    pub fn missing_streak(&self) -> u32 {
        self.missing_streak
    }
}

/// Fill level in percent: `round(height / tank_height * 100)`, clamped to `0..=100`.
///
/// A zero tank height yields 0.
pub fn fill_percent(height_mm: u32, tank_height_mm: u32) -> u8 {
    if tank_height_mm == 0 {
        return 0;
    }
    let height = u64::from(height_mm);
    let tank = u64::from(tank_height_mm);
    // Integer round-half-up of height * 100 / tank
    let percent = (height * 200 + tank) / (tank * 2);
    percent.min(100) as u8
}
