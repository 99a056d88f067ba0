//! # Simulated Tank
//!
//! Stand-in sensor for development when no DS1603L is attached. It produces
//! a believable level trace so the whole pipeline, both transports and the
//! console display can be exercised on a desk.
//!
//! ## Model Characteristics
//!
//! - **Drain**: the tank starts 90 % full and empties linearly over
//!   [`DRAIN_PERIOD`], then refills and starts over
//! - **Slosh**: a sine wave of [`SLOSH_AMPLITUDE_MM`] with a 7 s period,
//!   which the moving average is expected to flatten
//! - **Checksum errors**: every 9th read carries a corrupted frame
//! - **Dropouts**: reads 40–42 of every 60 report no sensor, long enough
//!   to trip the default missing-reading threshold
//!
//! The trace depends only on elapsed time and the read counter, so tests
//! can pin it down exactly.

use crate::sensor::SensorSource;
use crate::{RawSample, SensorStatus};
use std::time::{Duration, Instant};

/// Time for the simulated tank to go from full to empty.
pub const DRAIN_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Peak deviation caused by sloshing.
pub const SLOSH_AMPLITUDE_MM: f32 = 12.0;

const SLOSH_PERIOD_SECS: f32 = 7.0;
const START_FRACTION: f32 = 0.9;
const CHECKSUM_FAIL_EVERY: u64 = 9;
const DROPOUT_CYCLE: u64 = 60;
const DROPOUT_READS: std::ops::Range<u64> = 40..43;

/// Liquid height at `elapsed` for a tank `tank_height_mm` tall.
pub fn approximate_level(elapsed: Duration, tank_height_mm: u32) -> u32 {
    let tank = tank_height_mm as f32;
    let cycle = elapsed.as_secs_f32() % DRAIN_PERIOD.as_secs_f32();
    let drained = cycle / DRAIN_PERIOD.as_secs_f32();
    let base = tank * START_FRACTION * (1.0 - drained);

    let theta = elapsed.as_secs_f32() / SLOSH_PERIOD_SECS * std::f32::consts::TAU;
    let level = base + SLOSH_AMPLITUDE_MM * theta.sin();

    level.clamp(0.0, tank).round() as u32
}

/// Deterministic synthetic sensor.
#[derive(Debug)]
pub struct SimulatedSensor {
    started: Instant,
    tank_height_mm: u32,
    reads: u64,
}

impl SimulatedSensor {
    pub fn new(started: Instant, tank_height_mm: u32) -> Self {
        Self {
            started,
            tank_height_mm,
            reads: 0,
        }
    }
}

impl SensorSource for SimulatedSensor {
    fn read(&mut self, now: Instant) -> Option<RawSample> {
        let index = self.reads;
        self.reads += 1;

        if DROPOUT_READS.contains(&(index % DROPOUT_CYCLE)) {
            return Some(RawSample::missing());
        }

        let elapsed = now.saturating_duration_since(self.started);
        let status = if index % CHECKSUM_FAIL_EVERY == CHECKSUM_FAIL_EVERY - 1 {
            SensorStatus::ChecksumFail
        } else {
            SensorStatus::Valid
        };
        Some(RawSample {
            value_mm: approximate_level(elapsed, self.tank_height_mm),
            status,
        })
    }
}
