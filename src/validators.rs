//! Per-measurement validators.
//!
//! Each validator takes one [`Reading`] and either passes it through or
//! signals an [`Anomaly`]. They are designed to be baked (see
//! [`crate::baking`]) into a fixed slot of the capture pipeline.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Anomaly, ScanResult};
use crate::hardware::{OperatorDecision, SaturationDecision, SensorState};
use crate::measurement::Reading;

/// Full-scale value of the 10-bit sensor ADC.
pub const TEN_BIT_FULL_SCALE: f64 = 1023.0;

/// Gain decrement applied when the operator asks to retry.
pub const DEFAULT_GAIN_STEP: f64 = 10.0;

/// Returns the reading unchanged. Default post-processing step.
pub fn unchanged(reading: Reading) -> Reading {
    reading
}

/// Signals [`Anomaly::NonZeroReading`] if the averaged value is not zero.
pub fn stop_on_nonzero(reading: Reading) -> Result<Reading, Anomaly> {
    if reading.value != 0.0 {
        warn!(value = reading.value, "Non-zero reading");
        return Err(Anomaly::NonZeroReading);
    }
    Ok(reading)
}

/// Saturation detection parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationPolicy {
    /// Maximum representable sensor value
    pub saturation_level: f64,
    /// Amount subtracted from the gain on retry
    pub gain_step: f64,
}

impl Default for SaturationPolicy {
    fn default() -> Self {
        Self {
            saturation_level: TEN_BIT_FULL_SCALE,
            gain_step: DEFAULT_GAIN_STEP,
        }
    }
}

/// Checks whether `reading` is pinned at full scale and asks the operator
/// what to do about it.
///
/// The operator is only consulted when all of these hold:
/// - `reading.value == policy.saturation_level`
/// - `sensor.gain >= 0`
/// - `sensor.ignore_saturation` is false
///
/// Outcomes:
/// - `Retry`: gain drops by `policy.gain_step`, then [`Anomaly::Saturation`]
///   is returned so the caller retakes the whole measurement set.
/// - `Ignore`: the reading passes through.
/// - `IgnoreAll`: `ignore_saturation` is set for the rest of the scan and the
///   reading passes through.
pub fn saturation_reached(
    reading: Reading,
    sensor: &mut SensorState,
    decider: &mut dyn OperatorDecision,
    policy: &SaturationPolicy,
) -> ScanResult<Reading> {
    if reading.value != policy.saturation_level
        || sensor.gain < 0.0
        || sensor.ignore_saturation
    {
        return Ok(reading);
    }

    warn!(
        value = reading.value,
        gain = sensor.gain,
        "Measurement saturation reached"
    );
    match decider.decide(Anomaly::Saturation)? {
        SaturationDecision::Retry => {
            sensor.gain -= policy.gain_step;
            info!(gain = sensor.gain, "Gain turned down, retaking measurement set");
            Err(Anomaly::Saturation.into())
        }
        SaturationDecision::Ignore => Ok(reading),
        SaturationDecision::IgnoreAll => {
            info!("Ignoring saturation for the remainder of the scan");
            sensor.ignore_saturation = true;
            Ok(reading)
        }
    }
}

/// Signals [`Anomaly::NoisySignal`] when the relative error exceeds
/// `max_relative_error`.
///
/// A zero value with a non-zero error counts as noisy.
pub fn check_noise(reading: Reading, max_relative_error: f64) -> Result<Reading, Anomaly> {
    let noisy = if reading.value == 0.0 {
        reading.error != 0.0
    } else {
        (reading.error / reading.value).abs() > max_relative_error
    };
    if noisy {
        warn!(
            value = reading.value,
            error = reading.error,
            max_relative_error,
            "Noisy signal"
        );
        return Err(Anomaly::NoisySignal);
    }
    Ok(reading)
}

/// Signals [`Anomaly::ZeroSignal`] when every reading in the set is zero.
///
/// An empty set carries no signal either.
pub fn reject_zero_set(readings: &[Reading]) -> Result<(), Anomaly> {
    if readings.iter().all(|r| r.value == 0.0) {
        warn!(count = readings.len(), "All readings are zero");
        return Err(Anomaly::ZeroSignal);
    }
    Ok(())
}
