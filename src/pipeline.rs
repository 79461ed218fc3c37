//! Capture pipeline: baked validator steps chained over one reading.
//!
//! The capture loop hands every raw [`Reading`] to a [`Pipeline`]. Each step
//! either transforms the reading or fails; the first failure stops the chain
//! and propagates to the loop, which decides whether to retry, abort or
//! switch sequencer.
//!
//! Validators are plugged in through the currying adapter. The argument type
//! flowing through baked steps is [`StepArg`]; `StepArg::Hole` marks the slot
//! that receives the reading at call time.

use std::fmt;

use crate::baking::{Baked, Kwargs};
use crate::error::{ScanError, ScanResult};
use crate::hardware::{OperatorDecision, SensorHandle};
use crate::measurement::Reading;
use crate::validators::{self, SaturationPolicy};

/// Positional/keyword argument of a baked capture step.
#[derive(Clone)]
pub enum StepArg {
    /// Placeholder for a pass-through slot
    Hole,
    Reading(Reading),
    Sensor(SensorHandle),
    Value(f64),
}

impl StepArg {
    fn into_reading(self) -> ScanResult<Reading> {
        match self {
            StepArg::Reading(reading) => Ok(reading),
            other => Err(ScanError::Configuration(format!(
                "expected a reading argument, got {:?}",
                other
            ))),
        }
    }

    fn as_sensor(&self) -> ScanResult<&SensorHandle> {
        match self {
            StepArg::Sensor(sensor) => Ok(sensor),
            other => Err(ScanError::Configuration(format!(
                "expected a sensor argument, got {:?}",
                other
            ))),
        }
    }

    fn as_value(&self) -> ScanResult<f64> {
        match self {
            StepArg::Value(value) => Ok(*value),
            other => Err(ScanError::Configuration(format!(
                "expected a numeric argument, got {:?}",
                other
            ))),
        }
    }
}

impl fmt::Debug for StepArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepArg::Hole => write!(f, "Hole"),
            StepArg::Reading(r) => write!(f, "Reading({}, {})", r.value, r.error),
            StepArg::Sensor(s) => match s.try_borrow() {
                Ok(state) => write!(f, "Sensor(gain={})", state.gain),
                Err(_) => write!(f, "Sensor(<borrowed>)"),
            },
            StepArg::Value(v) => write!(f, "Value({})", v),
        }
    }
}

impl From<Reading> for StepArg {
    fn from(reading: Reading) -> Self {
        StepArg::Reading(reading)
    }
}

/// Baked capture step taking the reading through its single open slot.
pub type BakedStep = Baked<StepArg, ScanResult<Reading>>;

/// One stage of the capture pipeline.
pub trait CaptureStep {
    fn apply(&mut self, reading: Reading) -> ScanResult<Reading>;
}

impl<F> CaptureStep for F
where
    F: FnMut(Reading) -> ScanResult<Reading>,
{
    fn apply(&mut self, reading: Reading) -> ScanResult<Reading> {
        self(reading)
    }
}

impl CaptureStep for BakedStep {
    fn apply(&mut self, reading: Reading) -> ScanResult<Reading> {
        self.call(vec![StepArg::Reading(reading)])?
    }
}

/// Ordered chain of capture steps.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn CaptureStep>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step to the end of the chain.
    pub fn with_step(mut self, step: impl CaptureStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn push(&mut self, step: impl CaptureStep + 'static) {
        self.steps.push(Box::new(step));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs `reading` through every step; an empty pipeline is the identity.
    pub fn process(&mut self, reading: Reading) -> ScanResult<Reading> {
        self.steps
            .iter_mut()
            .try_fold(reading, |reading, step| step.apply(reading))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Bakes [`validators::unchanged`].
pub fn bake_unchanged() -> ScanResult<BakedStep> {
    Baked::new(
        |mut args: Vec<StepArg>, _: &Kwargs<StepArg>| -> ScanResult<Reading> {
            let arg = args.pop().unwrap_or(StepArg::Hole);
            arg.into_reading().map(validators::unchanged)
        },
        vec![StepArg::Hole],
        Kwargs::new(),
        0,
    )
}

/// Bakes [`validators::stop_on_nonzero`].
pub fn bake_stop_on_nonzero() -> ScanResult<BakedStep> {
    Baked::new(
        |mut args: Vec<StepArg>, _: &Kwargs<StepArg>| -> ScanResult<Reading> {
            let reading = args.pop().unwrap_or(StepArg::Hole).into_reading()?;
            Ok(validators::stop_on_nonzero(reading)?)
        },
        vec![StepArg::Hole],
        Kwargs::new(),
        0,
    )
}

/// Bakes [`validators::check_noise`] with a fixed relative-error criterion.
pub fn bake_noise_check(max_relative_error: f64) -> ScanResult<BakedStep> {
    let mut kwargs = Kwargs::new();
    kwargs.insert(
        "max_relative_error".to_string(),
        StepArg::Value(max_relative_error),
    );
    Baked::new(
        |mut args: Vec<StepArg>, kwargs: &Kwargs<StepArg>| -> ScanResult<Reading> {
            let reading = args.pop().unwrap_or(StepArg::Hole).into_reading()?;
            let limit = kwargs
                .get("max_relative_error")
                .ok_or_else(|| ScanError::Configuration("missing max_relative_error".into()))?
                .as_value()?;
            Ok(validators::check_noise(reading, limit)?)
        },
        vec![StepArg::Hole],
        kwargs,
        0,
    )
}

/// Bakes [`validators::saturation_reached`] with the sensor handle in slot 1,
/// leaving slot 0 for the reading.
pub fn bake_saturation_check<D>(
    sensor: SensorHandle,
    mut decider: D,
    policy: SaturationPolicy,
) -> ScanResult<BakedStep>
where
    D: OperatorDecision + 'static,
{
    Baked::new(
        move |args: Vec<StepArg>, _: &Kwargs<StepArg>| -> ScanResult<Reading> {
            let mut args = args.into_iter();
            let reading = args.next().unwrap_or(StepArg::Hole).into_reading()?;
            let sensor_arg = args.next().unwrap_or(StepArg::Hole);
            let sensor = sensor_arg.as_sensor()?;
            let mut state = sensor.borrow_mut();
            validators::saturation_reached(reading, &mut *state, &mut decider, &policy)
        },
        vec![StepArg::Hole, StepArg::Sensor(sensor)],
        Kwargs::new(),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Anomaly;
    use crate::hardware::{FixedDecision, SaturationDecision, SensorState};
    use crate::validators::TEN_BIT_FULL_SCALE;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_empty_pipeline_is_identity() {
        let mut pipeline = Pipeline::new();
        let r = Reading::new(1.5, 0.1);
        assert_eq!(pipeline.process(r).unwrap(), r);
    }

    #[test]
    fn test_steps_run_in_order() {
        let mut pipeline = Pipeline::new()
            .with_step(|r: Reading| -> ScanResult<Reading> {
                Ok(Reading::new(r.value * 2.0, r.error))
            })
            .with_step(|r: Reading| -> ScanResult<Reading> {
                Ok(Reading::new(r.value + 1.0, r.error))
            });
        assert_eq!(pipeline.process(Reading::new(3.0, 0.0)).unwrap().value, 7.0);
    }

    #[test]
    fn test_first_failure_short_circuits() {
        let reached = Rc::new(Cell::new(0));
        let counter = reached.clone();
        let mut pipeline = Pipeline::new()
            .with_step(bake_stop_on_nonzero().unwrap())
            .with_step(move |r: Reading| -> ScanResult<Reading> {
                counter.set(counter.get() + 1);
                Ok(r)
            });
        let err = pipeline.process(Reading::new(1.0, 0.0)).unwrap_err();
        assert_eq!(err.anomaly(), Some(Anomaly::NonZeroReading));
        assert_eq!(reached.get(), 0);

        assert!(pipeline.process(Reading::new(0.0, 0.0)).is_ok());
        assert_eq!(reached.get(), 1);
    }

    #[test]
    fn test_baked_unchanged() {
        let mut step = bake_unchanged().unwrap();
        let r = Reading::new(4.0, 0.4);
        assert_eq!(step.apply(r).unwrap(), r);
        assert_eq!(step.arity(), 1);
    }

    #[test]
    fn test_baked_noise_check() {
        let mut step = bake_noise_check(0.1).unwrap();
        assert!(step.apply(Reading::new(10.0, 0.5)).is_ok());
        assert_eq!(
            step.apply(Reading::new(10.0, 5.0)).unwrap_err().anomaly(),
            Some(Anomaly::NoisySignal)
        );
    }

    #[test]
    fn test_baked_saturation_check_shares_sensor() {
        let sensor = SensorState::new(20.0).into_handle();
        let mut step = bake_saturation_check(
            sensor.clone(),
            FixedDecision(SaturationDecision::Retry),
            SaturationPolicy::default(),
        )
        .unwrap();

        assert!(step.apply(Reading::new(100.0, 1.0)).is_ok());
        let err = step.apply(Reading::new(TEN_BIT_FULL_SCALE, 0.0)).unwrap_err();
        assert_eq!(err.anomaly(), Some(Anomaly::Saturation));
        assert_eq!(sensor.borrow().gain, 10.0);
    }

    #[test]
    fn test_baked_step_rejects_wrong_arity() {
        let mut step = bake_unchanged().unwrap();
        let err = step
            .call(vec![StepArg::Reading(Reading::new(0.0, 0.0)), StepArg::Hole])
            .unwrap_err();
        assert!(matches!(err, ScanError::ArgumentCount { expected: 1, got: 2 }));
    }
}
