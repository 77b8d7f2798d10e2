//! Raw six-axis IMU samples to vehicle attitude.
//!
//! Roll and pitch come straight from the gravity vector of each sample, yaw is
//! open-loop integration of the z gyro rate. There is no drift correction.
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Counts per g for a ±2 g accelerometer range.
pub const DEFAULT_ACCEL_COUNTS_PER_G: f64 = 16384.0;
/// Counts per degree/second for a ±250 °/s gyro range.
pub const DEFAULT_GYRO_COUNTS_PER_DPS: f64 = 131.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub ax: i32,
    pub ay: i32,
    pub az: i32,
    pub gx: i32,
    pub gy: i32,
    pub gz: i32,
}

/// Angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorScale {
    pub accel_counts_per_g: f64,
    pub gyro_counts_per_dps: f64,
}

impl Default for SensorScale {
    fn default() -> Self {
        Self {
            accel_counts_per_g: DEFAULT_ACCEL_COUNTS_PER_G,
            gyro_counts_per_dps: DEFAULT_GYRO_COUNTS_PER_DPS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttitudeEstimator {
    scale: SensorScale,
    attitude: Attitude,
    last_sample_at: Option<Instant>,
    samples: u64,
}

impl AttitudeEstimator {
    pub fn new(scale: SensorScale) -> Self {
        Self { scale, attitude: Attitude::default(), last_sample_at: None, samples: 0 }
    }

    pub fn attitude(&self) -> Attitude {
        self.attitude
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Forget the last sample time so the next sample only sets a new
    /// baseline. Accumulated yaw is kept.
    pub fn restart_timer(&mut self) {
        self.last_sample_at = None;
    }

    /// Fold one sample taken at `now` into the estimate.
    ///
    /// The first sample only establishes the integration baseline for yaw.
    pub fn update(&mut self, sample: &TelemetrySample, now: Instant) -> Attitude {
        let ax = sample.ax as f64 / self.scale.accel_counts_per_g;
        let ay = sample.ay as f64 / self.scale.accel_counts_per_g;
        let az = sample.az as f64 / self.scale.accel_counts_per_g;
        let gz = sample.gz as f64 / self.scale.gyro_counts_per_dps;

        let pitch = ay.atan2(az).to_degrees();
        // Positive roll is right wing down, the direction the horizon rotates.
        let roll = -(-ax).atan2((ay * ay + az * az).sqrt()).to_degrees();

        let dt = match self.last_sample_at {
            Some(prev) => now.saturating_duration_since(prev).as_secs_f64(),
            None => 0.0,
        };
        self.last_sample_at = Some(now);

        self.attitude.roll = roll;
        self.attitude.pitch = pitch;
        self.attitude.yaw += gz * dt;
        self.samples += 1;
        self.attitude
    }
}

impl Default for AttitudeEstimator {
    fn default() -> Self {
        Self::new(SensorScale::default())
    }
}
