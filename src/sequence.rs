//! Position sequencers and the revisit filter.
//!
//! Sequencers are plain iterators of [`Position`]. They hold only their index
//! counters, suspend between positions and resume exactly where they left
//! off. None of them can be rewound: build a new instance to start over.
//!
//! - [`Raster`]: every `(x[i], y[j], z[k]) + origin`, z varying fastest.
//! - [`FixedTimer`]: each raster position repeated `count` times (dwell).
//! - [`ExplicitList`]: an arbitrary list of position-like records.
//!
//! [`revisit_check`] removes already-measured positions from a proposed batch.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Anomaly, ScanResult};
use crate::measurement::{Position, ResultsTable};

/// `points` evenly spaced values from `start` to `stop` inclusive.
///
/// A single point yields `start`; zero points yield nothing.
pub fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

// =============================================================================
// Raster
// =============================================================================

/// Full raster over three per-axis coordinate lists.
///
/// Visits `x` in the outer loop, then `y`, then `z`:
///
/// ```
/// use laser_align::measurement::Position;
/// use laser_align::sequence::Raster;
///
/// let positions: Vec<_> =
///     Raster::new(vec![1.0, 2.0], vec![3.0, 4.0], vec![0.0], Position::default()).collect();
/// assert_eq!(positions[1], Position::new(1.0, 4.0, 0.0));
/// assert_eq!(positions.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct Raster {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    origin: Position,

    // Execution state
    i: usize,
    j: usize,
    k: usize,
}

impl Raster {
    /// Creates a raster offset by `origin`.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>, origin: Position) -> Self {
        Self {
            x,
            y,
            z,
            origin,
            i: 0,
            j: 0,
            k: 0,
        }
    }

    /// Total number of positions in the raster.
    pub fn num_points(&self) -> usize {
        self.x.len() * self.y.len() * self.z.len()
    }

    fn remaining(&self) -> usize {
        if self.y.is_empty() || self.z.is_empty() || self.i >= self.x.len() {
            return 0;
        }
        let done = (self.i * self.y.len() + self.j) * self.z.len() + self.k;
        self.num_points() - done
    }
}

impl Iterator for Raster {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.remaining() == 0 {
            return None;
        }

        let pos = Position::new(self.x[self.i], self.y[self.j], self.z[self.k]) + self.origin;

        // Advance z fastest, then y, then x
        self.k += 1;
        if self.k >= self.z.len() {
            self.k = 0;
            self.j += 1;
            if self.j >= self.y.len() {
                self.j = 0;
                self.i += 1;
            }
        }

        trace!(%pos, "raster position");
        Some(pos)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Raster {}

// =============================================================================
// FixedTimer
// =============================================================================

/// Holds the stage at each raster position for `count` consecutive
/// measurements.
///
/// The consumer is expected to wait [`FixedTimer::interval`] between
/// successive yields. With [`FixedTimer::blocking`] the iterator sleeps for
/// the interval itself before each yield after the first. Dropping the
/// iterator mid-dwell never produces the remaining repeats.
#[derive(Debug, Clone)]
pub struct FixedTimer {
    raster: Raster,
    count: usize,
    interval: Duration,
    blocking: bool,

    // Execution state
    current: Option<Position>,
    remaining: usize,
    started: bool,
}

impl FixedTimer {
    /// Wraps `raster`, repeating each position `count` times.
    pub fn new(raster: Raster, count: usize, interval: Duration) -> Self {
        Self {
            raster,
            count,
            interval,
            blocking: false,
            current: None,
            remaining: 0,
            started: false,
        }
    }

    /// Sleep for the interval inside `next()` instead of leaving it to the consumer.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Wait between successive measurements.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Measurements taken per position.
    pub fn repeats(&self) -> usize {
        self.count
    }

    /// Repeats still to come for the current position.
    pub fn remaining_repeats(&self) -> usize {
        self.remaining
    }
}

impl Iterator for FixedTimer {
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        if self.count == 0 {
            return None;
        }
        if self.remaining == 0 {
            let next = self.raster.next()?;
            debug!(position = %next, count = self.count, "dwelling at position");
            self.current = Some(next);
            self.remaining = self.count;
        }

        if self.blocking && self.started && !self.interval.is_zero() {
            thread::sleep(self.interval);
        }
        self.started = true;
        self.remaining -= 1;
        self.current
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.count == 0 {
            0
        } else {
            self.remaining + self.raster.len() * self.count
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for FixedTimer {}

// =============================================================================
// ExplicitList
// =============================================================================

/// Yields each record of an arbitrary ordered sequence as a [`Position`].
#[derive(Debug, Clone)]
pub struct ExplicitList<I> {
    records: I,
}

impl<I> ExplicitList<I>
where
    I: Iterator,
    I::Item: Into<Position>,
{
    pub fn new<T>(records: T) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            records: records.into_iter(),
        }
    }
}

impl<I> Iterator for ExplicitList<I>
where
    I: Iterator,
    I::Item: Into<Position>,
{
    type Item = Position;

    fn next(&mut self) -> Option<Position> {
        self.records.next().map(Into::into)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.records.size_hint()
    }
}

// =============================================================================
// Revisit filter
// =============================================================================

/// Removes positions already present in `results` from `proposed`.
///
/// Equality is exact (bit pattern). When `results` is empty or
/// `overlap_allowed` is set, nothing is filtered. The returned batch is
/// deduplicated and keeps the order of first appearance in `proposed`.
///
/// An empty return value is not an error here; callers that expected more
/// positions should raise [`Anomaly::Overlapped`] via
/// [`ensure_not_overlapped`].
pub fn revisit_check<I>(
    results: &ResultsTable,
    proposed: I,
    overlap_allowed: bool,
) -> Vec<Position>
where
    I: IntoIterator,
    I::Item: Into<Position>,
{
    let visited: HashSet<_> = if overlap_allowed || results.is_empty() {
        HashSet::new()
    } else {
        results.positions().map(|p| p.key()).collect()
    };

    let mut seen = HashSet::new();
    let batch: Vec<Position> = proposed
        .into_iter()
        .map(Into::into)
        .filter(|p: &Position| !visited.contains(&p.key()) && seen.insert(p.key()))
        .collect();

    debug!(
        visited = visited.len(),
        new = batch.len(),
        overlap_allowed,
        "revisit check"
    );
    batch
}

/// Signals [`Anomaly::Overlapped`] when a filtered batch came back empty.
pub fn ensure_not_overlapped(batch: &[Position]) -> ScanResult<()> {
    if batch.is_empty() {
        return Err(Anomaly::Overlapped.into());
    }
    Ok(())
}
