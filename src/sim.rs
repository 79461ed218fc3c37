//! Simulated collaborators and a reference capture loop.
//!
//! Provides stand-ins for the hardware the scan engine is normally wired to:
//!
//! - [`MockStage`]: records every commanded move.
//! - [`MockBeamSensor`]: Gaussian beam profile with gain, full-scale clipping
//!   and seeded noise.
//! - [`run_scan`]: a minimal move-and-capture loop that pulls positions,
//!   runs each reading through a [`Pipeline`] and appends rows.
//!
//! These exist for the CLI demo and for integration tests; real drivers
//! implement [`Stage`] directly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::{Anomaly, ScanError, ScanResult};
use crate::hardware::{SensorHandle, Stage};
use crate::measurement::{Position, Reading, ResultsRow, ResultsTable};
use crate::pipeline::Pipeline;

// =============================================================================
// MockStage
// =============================================================================

/// Stage that moves instantly and remembers where it has been.
#[derive(Debug, Clone, Default)]
pub struct MockStage {
    position: Position,
    moves: Vec<Position>,
}

impl MockStage {
    pub fn new(position: Position) -> Self {
        Self {
            position,
            moves: Vec::new(),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Every position commanded so far, in order.
    pub fn moves(&self) -> &[Position] {
        &self.moves
    }
}

impl Stage for MockStage {
    fn move_to_pos(&mut self, position: Position) -> ScanResult<()> {
        if !(position.x.is_finite() && position.y.is_finite() && position.z.is_finite()) {
            return Err(ScanError::Stage(format!("refusing to move to {}", position)));
        }
        debug!(from = %self.position, to = %position, "MockStage: moving");
        self.position = position;
        self.moves.push(position);
        Ok(())
    }
}

// =============================================================================
// MockBeamSensor
// =============================================================================

/// Photodiode looking at a Gaussian beam.
///
/// Brightness at `p` is `peak * exp(-|p - centre|^2 / (2 width^2))`, scaled
/// by `10^(gain / 10)` and clipped to `full_scale`.
#[derive(Debug, Clone)]
pub struct MockBeamSensor {
    centre: Position,
    width: f64,
    peak: f64,
    full_scale: f64,
    noise: f64,
    rng: StdRng,
}

impl MockBeamSensor {
    pub fn new(centre: Position, width: f64, peak: f64) -> Self {
        Self {
            centre,
            width,
            peak,
            full_scale: crate::validators::TEN_BIT_FULL_SCALE,
            noise: 0.0,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Adds uniform noise of relative amplitude `noise`, reproducible from `seed`.
    pub fn with_noise(mut self, noise: f64, seed: u64) -> Self {
        self.noise = noise;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_full_scale(mut self, full_scale: f64) -> Self {
        self.full_scale = full_scale;
        self
    }

    /// Takes one averaged reading at `position` with the given gain.
    pub fn read(&mut self, position: Position, gain: f64) -> Reading {
        let d = position - self.centre;
        let r2 = d.x * d.x + d.y * d.y + d.z * d.z;
        let clean = self.peak * (-r2 / (2.0 * self.width * self.width)).exp();
        let jitter = if self.noise > 0.0 {
            self.rng.gen_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        let scaled = clean * (1.0 + jitter) * 10f64.powf(gain / 10.0);
        let value = scaled.round().clamp(0.0, self.full_scale);
        Reading::new(value, (clean * self.noise).abs())
    }
}

// =============================================================================
// Reference capture loop
// =============================================================================

/// Limits for [`run_scan`].
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    /// Restarts allowed after a saturation anomaly
    pub max_restarts: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self { max_restarts: 5 }
    }
}

/// Moves to each position, reads, validates and records.
///
/// `positions` builds a fresh sequence. On [`Anomaly::Saturation`] the table
/// is cleared and the whole measurement set is retaken from a new sequence;
/// every other error aborts the scan. The sensor's per-scan flags are reset
/// at start and end.
pub fn run_scan<S, F, I>(
    stage: &mut S,
    sensor: &mut MockBeamSensor,
    state: &SensorHandle,
    pipeline: &mut Pipeline,
    mut positions: F,
    limits: ScanLimits,
) -> ScanResult<ResultsTable>
where
    S: Stage + ?Sized,
    F: FnMut() -> ScanResult<I>,
    I: Iterator<Item = Position>,
{
    state.borrow_mut().reset_scan_flags();
    let mut restarts = 0;

    let outcome = loop {
        match capture_all(stage, sensor, state, pipeline, positions()?) {
            Err(ScanError::Anomaly(Anomaly::Saturation)) if restarts < limits.max_restarts => {
                restarts += 1;
                warn!(restarts, "Saturation, retaking measurement set");
            }
            other => break other,
        }
    };

    state.borrow_mut().reset_scan_flags();
    if let Ok(results) = &outcome {
        info!(rows = results.len(), restarts, "Scan complete");
    }
    outcome
}

fn capture_all<S, I>(
    stage: &mut S,
    sensor: &mut MockBeamSensor,
    state: &SensorHandle,
    pipeline: &mut Pipeline,
    positions: I,
) -> ScanResult<ResultsTable>
where
    S: Stage + ?Sized,
    I: Iterator<Item = Position>,
{
    let mut results = ResultsTable::new();
    for position in positions {
        stage.move_to_pos(position)?;
        let gain = state.borrow().gain;
        let raw = sensor.read(position, gain);
        let reading = pipeline.process(raw)?;
        results.push(ResultsRow::new(position, reading.value).with_extra(gain));
    }
    Ok(results)
}
