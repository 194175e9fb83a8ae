//! Sensor reader — optional GPS/barometric fixes for sample enrichment.
//!
//! The physical sensor package (NMEA serial GPS, I2C barometer) is driven
//! by a separate process on real hardware; the agent only consumes fixes
//! through this seam. The simulated reader generates plausible wandering
//! fixes for dev machines and containers without the hardware.

use async_trait::async_trait;

use cellmeter_common::models::SensorFix;

#[async_trait]
pub trait SensorReader: Send + Sync {
    /// Latest fix, or `None` when no usable reading is available.
    async fn read(&self) -> Option<SensorFix>;
}

/// Generates realistic fake fixes around a base coordinate.
pub struct SimulatedSensorReader {
    base_latitude: f64,
    base_longitude: f64,
    base_altitude_m: f64,
}

impl SimulatedSensorReader {
    pub fn new() -> Self {
        SimulatedSensorReader {
            base_latitude: 52.5200,
            base_longitude: 13.4050,
            base_altitude_m: 120.0,
        }
    }
}

impl Default for SimulatedSensorReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorReader for SimulatedSensorReader {
    async fn read(&self) -> Option<SensorFix> {
        use rand::RngExt;
        let mut rng = rand::rng();
        Some(SensorFix {
            latitude: self.base_latitude + rng.random_range(-0.0005..0.0005),
            longitude: self.base_longitude + rng.random_range(-0.0005..0.0005),
            altitude_m: self.base_altitude_m + rng.random_range(-3.0..30.0),
            ground_speed_kmh: Some(rng.random_range(0.0..90.0)),
        })
    }
}
