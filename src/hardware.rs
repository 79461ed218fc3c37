//! Collaborator interfaces: stage, sensor state and operator decisions.
//!
//! The scan engine never owns hardware. It talks to the outside world
//! through three narrow seams:
//!
//! - [`Stage`]: anything that can be commanded to an absolute [`Position`].
//! - [`SensorState`]: the mutable `gain` / `ignore_saturation` pair that the
//!   saturation validator reads and writes. Shared with the capture loop
//!   through a [`SensorHandle`].
//! - [`OperatorDecision`]: a synchronous request/response channel that
//!   resolves a saturation anomaly into retry / ignore / ignore-all.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io::{BufRead, Write};
use std::rc::Rc;

use crate::error::{Anomaly, ScanError, ScanResult};
use crate::measurement::Position;

/// A motion stage that accepts absolute moves.
pub trait Stage {
    /// Move to an absolute position, blocking until the move completes.
    fn move_to_pos(&mut self, position: Position) -> ScanResult<()>;
}

impl<S: Stage + ?Sized> Stage for &mut S {
    fn move_to_pos(&mut self, position: Position) -> ScanResult<()> {
        (**self).move_to_pos(position)
    }
}

/// Mutable sensor settings touched during a scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    /// Gain setting; negative means the gain cannot be adjusted
    pub gain: f64,
    /// Suppress saturation prompts for the rest of the scan
    pub ignore_saturation: bool,
}

impl SensorState {
    pub fn new(gain: f64) -> Self {
        Self {
            gain,
            ignore_saturation: false,
        }
    }

    /// Clears per-scan flags. Called by the capture loop at scan start and end.
    pub fn reset_scan_flags(&mut self) {
        self.ignore_saturation = false;
    }

    /// Wraps the state in a shared handle.
    pub fn into_handle(self) -> SensorHandle {
        Rc::new(RefCell::new(self))
    }
}

/// Shared, single-threaded handle to the sensor state.
pub type SensorHandle = Rc<RefCell<SensorState>>;

/// Operator response to a saturation anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationDecision {
    /// Gain has been turned down; retake the measurement set.
    Retry,
    /// Carry on this time.
    Ignore,
    /// Carry on and stop asking for the rest of the scan.
    IgnoreAll,
}

impl fmt::Display for SaturationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Ignore => write!(f, "ignore"),
            Self::IgnoreAll => write!(f, "ignore all"),
        }
    }
}

impl std::str::FromStr for SaturationDecision {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "retry" => Ok(Self::Retry),
            "ignore" => Ok(Self::Ignore),
            "ignore all" | "ignore_all" | "ignore-all" => Ok(Self::IgnoreAll),
            other => Err(ScanError::Decision(format!(
                "unrecognised answer '{}', expected 'retry', 'ignore' or 'ignore all'",
                other
            ))),
        }
    }
}

/// Source of operator decisions for anomalies that need a human.
pub trait OperatorDecision {
    /// Blocks until a decision for `anomaly` is available.
    fn decide(&mut self, anomaly: Anomaly) -> ScanResult<SaturationDecision>;
}

impl<F> OperatorDecision for F
where
    F: FnMut(Anomaly) -> ScanResult<SaturationDecision>,
{
    fn decide(&mut self, anomaly: Anomaly) -> ScanResult<SaturationDecision> {
        self(anomaly)
    }
}

/// Always answers with the same decision.
#[derive(Clone, Copy, Debug)]
pub struct FixedDecision(pub SaturationDecision);

impl OperatorDecision for FixedDecision {
    fn decide(&mut self, _anomaly: Anomaly) -> ScanResult<SaturationDecision> {
        Ok(self.0)
    }
}

/// Replays a queue of pre-recorded decisions.
///
/// Fails with [`ScanError::Decision`] once the queue runs dry.
#[derive(Clone, Debug, Default)]
pub struct QueuedDecisions {
    queue: VecDeque<SaturationDecision>,
    asked: usize,
}

impl QueuedDecisions {
    pub fn new(decisions: impl IntoIterator<Item = SaturationDecision>) -> Self {
        Self {
            queue: decisions.into_iter().collect(),
            asked: 0,
        }
    }

    /// Number of times a decision was requested.
    pub fn asked(&self) -> usize {
        self.asked
    }
}

impl OperatorDecision for QueuedDecisions {
    fn decide(&mut self, anomaly: Anomaly) -> ScanResult<SaturationDecision> {
        self.asked += 1;
        self.queue
            .pop_front()
            .ok_or_else(|| ScanError::Decision(format!("no queued decision for {}", anomaly)))
    }
}

/// Asks a human on a line-oriented terminal, repeating until the answer parses.
pub struct PromptDecision<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptDecision<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl PromptDecision<std::io::StdinLock<'static>, std::io::Stdout> {
    /// Prompts on stdout and reads answers from stdin.
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> OperatorDecision for PromptDecision<R, W> {
    fn decide(&mut self, anomaly: Anomaly) -> ScanResult<SaturationDecision> {
        loop {
            write!(
                self.output,
                "{}. The gain should be turned down by one setting. Enter 'retry' after \
                 turning it down, 'ignore' to carry on this time, or 'ignore all' to carry \
                 on for the rest of the scan: ",
                anomaly
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ScanError::Decision("input closed before an answer".to_string()));
            }
            match line.parse() {
                Ok(decision) => return Ok(decision),
                Err(e) => writeln!(self.output, "{}", e)?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_parse() {
        assert_eq!(
            "ignore all".parse::<SaturationDecision>().unwrap(),
            SaturationDecision::IgnoreAll
        );
        assert_eq!(
            " retry\n".parse::<SaturationDecision>().unwrap(),
            SaturationDecision::Retry
        );
        assert!("maybe".parse::<SaturationDecision>().is_err());
    }

    #[test]
    fn test_queued_decisions_run_dry() {
        let mut decisions = QueuedDecisions::new([SaturationDecision::Ignore]);
        assert_eq!(
            decisions.decide(Anomaly::Saturation).unwrap(),
            SaturationDecision::Ignore
        );
        assert!(decisions.decide(Anomaly::Saturation).is_err());
        assert_eq!(decisions.asked(), 2);
    }

    #[test]
    fn test_prompt_repeats_until_valid() {
        let input = std::io::Cursor::new("what\nignore all\n");
        let mut output = Vec::new();
        let decision = PromptDecision::new(input, &mut output)
            .decide(Anomaly::Saturation)
            .unwrap();
        assert_eq!(decision, SaturationDecision::IgnoreAll);
        let shown = String::from_utf8(output).unwrap();
        assert_eq!(shown.matches("'ignore all'").count(), 3);
        assert!(shown.contains("unrecognised answer 'what'"));
    }

    #[test]
    fn test_prompt_fails_on_eof() {
        let mut prompt = PromptDecision::new(std::io::Cursor::new(""), std::io::sink());
        assert!(matches!(
            prompt.decide(Anomaly::Saturation),
            Err(ScanError::Decision(_))
        ));
    }

    #[test]
    fn test_reset_scan_flags() {
        let handle = SensorState::new(20.0).into_handle();
        handle.borrow_mut().ignore_saturation = true;
        handle.borrow_mut().reset_scan_flags();
        assert!(!handle.borrow().ignore_saturation);
        assert_eq!(handle.borrow().gain, 20.0);
    }
}
